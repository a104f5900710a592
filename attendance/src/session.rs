use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AttendanceError, AttendanceResult};
use util::ws::types::ClientTopic;

/// Length of the code students type to check in.
pub const ATTENDANCE_CODE_LEN: usize = 8;

/// Read-only description of one live class session.
///
/// Built by the session-start flow and handed to the view; nothing in this
/// crate can change it afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSession")]
pub struct SessionDescriptor {
    id: String,
    subject_name: String,
    attendance_code: String,
    window_expires_at: DateTime<Utc>,
}

impl SessionDescriptor {
    pub fn new(
        id: impl Into<String>,
        subject_name: impl Into<String>,
        attendance_code: impl Into<String>,
        window_expires_at: DateTime<Utc>,
    ) -> AttendanceResult<Self> {
        let id = id.into();
        let attendance_code = attendance_code.into();

        if id.trim().is_empty() {
            return Err(AttendanceError::InvalidSession("session id is empty".into()));
        }
        if attendance_code.chars().count() != ATTENDANCE_CODE_LEN {
            return Err(AttendanceError::InvalidSession(format!(
                "attendance code must be {ATTENDANCE_CODE_LEN} characters, got {:?}",
                attendance_code
            )));
        }

        Ok(Self {
            id,
            subject_name: subject_name.into(),
            attendance_code,
            window_expires_at,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subject_name(&self) -> &str {
        &self.subject_name
    }

    pub fn attendance_code(&self) -> &str {
        &self.attendance_code
    }

    pub fn window_expires_at(&self) -> DateTime<Utc> {
        self.window_expires_at
    }

    /// Real-time topic carrying this session's check-ins.
    pub fn topic(&self) -> String {
        ClientTopic::AttendanceSession {
            session_id: self.id.clone(),
        }
        .path()
    }
}

#[derive(Deserialize)]
struct RawSession {
    id: String,
    subject_name: String,
    attendance_code: String,
    window_expires_at: DateTime<Utc>,
}

impl TryFrom<RawSession> for SessionDescriptor {
    type Error = AttendanceError;

    fn try_from(raw: RawSession) -> Result<Self, Self::Error> {
        SessionDescriptor::new(
            raw.id,
            raw.subject_name,
            raw.attendance_code,
            raw.window_expires_at,
        )
    }
}
