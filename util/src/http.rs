//! HTTP plumbing for talking to the campus backend.
//!
//! Every backend endpoint answers with the same JSON envelope:
//! ```json
//! { "success": true, "data": { ... }, "message": "Roster retrieved" }
//! ```
//! [`read_envelope`] unwraps it into either the `data` payload or an [`ApiError`].

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Result type for backend calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors that can occur while calling the backend.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Backend rejected request ({status}): {message}")]
    Rejected { status: StatusCode, message: String },

    #[error("Malformed response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid client configuration: {0}")]
    Config(String),

    /// The task running the call died before it produced a response.
    #[error("Backend call aborted: {0}")]
    Aborted(String),
}

impl ApiError {
    /// Human-readable message suitable for an inline notice.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Rejected { message, .. } if !message.is_empty() => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Standardized response envelope used by the backend.
///
/// `data` is optional on the wire: error responses frequently send `{}` or
/// omit it entirely.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: String,
}

impl<T> ApiResponse<T> {
    /// Constructs a success envelope with the given data and message.
    pub fn success(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: message.into(),
        }
    }

    /// Constructs an error envelope with no data.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: message.into(),
        }
    }
}

/// Builds a `reqwest::Client` with the request timeout and, if `token` is
/// non-empty, a default `Authorization: Bearer ...` header.
pub fn build_client(timeout: Duration, token: Option<&str>) -> ApiResult<Client> {
    let mut headers = HeaderMap::new();
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ApiError::Config(format!("auth token is not a valid header: {e}")))?;
        headers.insert(AUTHORIZATION, value);
    }

    Ok(Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()?)
}

/// Reads a backend response and unwraps its envelope.
///
/// Non-2xx statuses and `success: false` envelopes become
/// [`ApiError::Rejected`], carrying the backend's message when there is one.
pub async fn read_envelope<T>(resp: Response) -> ApiResult<T>
where
    T: DeserializeOwned + Default,
{
    let status = resp.status();
    let body = resp.bytes().await?;
    decode_envelope(status, &body)
}

/// Decodes an envelope body received with `status`.
///
/// The envelope is parsed loosely first so that an error response with
/// `"data": {}` still yields its message rather than a decode failure.
pub fn decode_envelope<T>(status: StatusCode, body: &[u8]) -> ApiResult<T>
where
    T: DeserializeOwned + Default,
{
    let env = match serde_json::from_slice::<ApiResponse<Value>>(body) {
        Ok(env) => env,
        Err(_) if !status.is_success() => {
            return Err(ApiError::Rejected {
                status,
                message: String::from_utf8_lossy(body).trim().to_string(),
            });
        }
        Err(e) => return Err(ApiError::Decode(e)),
    };

    if !status.is_success() || !env.success {
        return Err(ApiError::Rejected {
            status,
            message: env.message,
        });
    }

    match env.data {
        None | Some(Value::Null) => Ok(T::default()),
        Some(data) => Ok(serde_json::from_value(data)?),
    }
}
