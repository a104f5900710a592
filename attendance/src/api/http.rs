use async_trait::async_trait;
use common::AppConfig;
use reqwest::{Client, Url};
use std::time::Duration;
use util::http::{ApiError, ApiResult, build_client, read_envelope};

use super::{RosterApi, RosterPayload};
use crate::finalize::{FinalizeAck, FinalizeRequest, FinalizedRoster};
use crate::roster::RosterEntry;

/// [`RosterApi`] over the campus REST backend.
///
/// - `GET  {base}/attendance/sessions/{id}/roster`
/// - `POST {base}/attendance/sessions/{id}/finalize`
#[derive(Debug, Clone)]
pub struct HttpRosterApi {
    client: Client,
    base_url: Url,
}

impl HttpRosterApi {
    pub fn new(base_url: &str, timeout: Duration, token: Option<&str>) -> ApiResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::Config(format!("invalid API base URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Config(format!(
                "API base URL '{base_url}' cannot carry a path"
            )));
        }
        Ok(Self {
            client: build_client(timeout, token)?,
            base_url,
        })
    }

    pub fn from_config(config: &AppConfig) -> ApiResult<Self> {
        Self::new(
            &config.api_base_url,
            Duration::from_secs(config.http_timeout_secs),
            Some(config.auth_token.as_str()),
        )
    }

    fn session_url(&self, session_id: &str, action: &str) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Config(format!("API base URL '{}' cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(["attendance", "sessions", session_id, action]);
        Ok(url)
    }
}

#[async_trait]
impl RosterApi for HttpRosterApi {
    async fn fetch_roster(&self, session_id: &str) -> ApiResult<Vec<RosterEntry>> {
        let url = self.session_url(session_id, "roster")?;
        tracing::debug!("GET {url}");

        let resp = self.client.get(url).send().await?;
        let data: RosterPayload = read_envelope(resp).await?;
        Ok(data.into_entries())
    }

    async fn finalize(&self, session_id: &str, roster: &FinalizedRoster) -> ApiResult<FinalizeAck> {
        let url = self.session_url(session_id, "finalize")?;
        tracing::debug!("POST {url} ({} entries)", roster.len());

        let body = FinalizeRequest {
            session_id: session_id.to_string(),
            roster: roster.clone(),
        };
        let resp = self.client.post(url).json(&body).send().await?;
        read_envelope(resp).await
    }
}
