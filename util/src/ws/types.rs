use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Frames this client sends on the multiplexed socket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        topics: Vec<ClientTopic>,
        since: Option<u64>,
    },
    Unsubscribe {
        topics: Vec<ClientTopic>,
    },
    Ping,
}

/// Frames the server sends back.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ready {
        policy_version: u64,
        exp: Option<i64>,
    },
    Pong,
    SubscribeOk {
        accepted: Vec<String>,
        #[serde(default)]
        rejected: Vec<(String, String)>,
    },
    UnsubscribeOk {
        topics: Vec<String>,
    },
    Event {
        event: String,
        topic: String,
        #[serde(default)]
        v: Option<u64>,
        payload: serde_json::Value,
        ts: String,
    },
    Error {
        code: String,
        message: String,
        #[serde(default)]
        meta: Option<HashMap<String, String>>,
    },
}

/* ---------- ClientTopic: structured topics ---------- */
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientTopic {
    // Attendance (per-session)
    AttendanceSession { session_id: String }, // "attendance:session:{sid}"
}

impl ClientTopic {
    const ATTENDANCE_SESSION: &'static str = "attendance:session:";

    pub fn path(&self) -> String {
        match self {
            ClientTopic::AttendanceSession { session_id } => {
                format!("{}{session_id}", Self::ATTENDANCE_SESSION)
            }
        }
    }

    /// Inverse of [`ClientTopic::path`]; `None` for paths this client cannot subscribe to.
    pub fn from_path(path: &str) -> Option<Self> {
        let session_id = path.strip_prefix(Self::ATTENDANCE_SESSION)?;
        if session_id.is_empty() {
            return None;
        }
        Some(ClientTopic::AttendanceSession {
            session_id: session_id.to_string(),
        })
    }
}
