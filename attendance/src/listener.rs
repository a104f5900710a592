//! Decoding of real-time check-in frames.
//!
//! Frames arrive as the backend's standard event envelope. Only
//! `attendance.marked` events for the mounted session are check-ins;
//! everything else on the topic is ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use util::ws::ReceivedEnvelope;

/// Event name of a student check-in.
pub const CHECK_IN_EVENT: &str = "attendance.marked";

/// "This student checked in now."
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckInEvent {
    #[serde(alias = "studentId", alias = "user_id", deserialize_with = "id_string")]
    pub student_id: String,
    #[serde(alias = "sessionId", default, deserialize_with = "opt_id_string")]
    pub session_id: Option<String>,
    #[serde(alias = "takenAt", default)]
    pub taken_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub method: Option<String>,
}

impl CheckInEvent {
    pub fn new(student_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            session_id: None,
            taken_at: None,
            method: None,
        }
    }
}

/// Why a frame was not treated as a check-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ignored {
    OtherEvent(String),
    ForeignSession(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    CheckIn(CheckInEvent),
    Ignored(Ignored),
    Malformed(String),
}

/// Classifies one raw frame received on `session_id`'s topic.
pub fn parse_frame(raw: &str, session_id: &str) -> Frame {
    let env = match serde_json::from_str::<ReceivedEnvelope<serde_json::Value>>(raw) {
        Ok(env) => env,
        Err(e) => return Frame::Malformed(e.to_string()),
    };
    if env.event != CHECK_IN_EVENT {
        return Frame::Ignored(Ignored::OtherEvent(env.event));
    }

    let event = match serde_json::from_value::<CheckInEvent>(env.payload) {
        Ok(event) => event,
        Err(e) => return Frame::Malformed(e.to_string()),
    };
    match &event.session_id {
        Some(other) if other != session_id => {
            Frame::Ignored(Ignored::ForeignSession(other.clone()))
        }
        _ => Frame::CheckIn(event),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Number(i64),
}

impl From<IdRepr> for String {
    fn from(id: IdRepr) -> Self {
        match id {
            IdRepr::Text(s) => s,
            IdRepr::Number(n) => n.to_string(),
        }
    }
}

fn id_string<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    IdRepr::deserialize(d).map(String::from)
}

fn opt_id_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<IdRepr>::deserialize(d)?.map(String::from))
}
