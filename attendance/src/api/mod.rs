//! Backend calls the view depends on.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use util::http::ApiResult;

use crate::finalize::{FinalizeAck, FinalizedRoster};
use crate::roster::RosterEntry;

pub use http::HttpRosterApi;

/// Roster fetch and finalize submission.
#[async_trait]
pub trait RosterApi: Send + Sync + 'static {
    /// Full current roster for `session_id`, in server order.
    async fn fetch_roster(&self, session_id: &str) -> ApiResult<Vec<RosterEntry>>;

    /// Submits the finalized roster as the permanent record.
    async fn finalize(&self, session_id: &str, roster: &FinalizedRoster) -> ApiResult<FinalizeAck>;
}

/// `data` of the roster endpoint in its wrapped form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RosterResponse {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub students: Vec<RosterEntry>,
}

/// `data` of the roster endpoint: either the bare entry list or the
/// `{session_id, students}` wrapper.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RosterPayload {
    List(Vec<RosterEntry>),
    Wrapped(RosterResponse),
}

impl Default for RosterPayload {
    fn default() -> Self {
        RosterPayload::List(Vec::new())
    }
}

impl RosterPayload {
    pub fn into_entries(self) -> Vec<RosterEntry> {
        match self {
            RosterPayload::List(entries) => entries,
            RosterPayload::Wrapped(resp) => resp.students,
        }
    }
}
