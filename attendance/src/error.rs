use std::sync::Arc;
use util::http::ApiError;

/// Result type for live-attendance operations.
pub type AttendanceResult<T> = Result<T, AttendanceError>;

/// Errors surfaced by the live-attendance view.
///
/// None of these are fatal: every one is tied to a single user action and the
/// view keeps running afterwards. Cloneable so one failed fetch can answer
/// every caller waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AttendanceError {
    #[error("Attendance window is still open")]
    WindowOpen,

    #[error("Roster has not been loaded yet")]
    RosterNotLoaded,

    #[error("Student {0} is not on this roster")]
    UnknownStudent(String),

    #[error("Attendance has already been finalized")]
    AlreadyFinalized,

    #[error("Finalize is already in progress")]
    FinalizeInProgress,

    #[error("Failed to load roster: {0}")]
    Fetch(#[source] Arc<ApiError>),

    #[error("Failed to finalize attendance: {0}")]
    Finalize(#[source] Arc<ApiError>),

    #[error("Real-time channel error: {0}")]
    Channel(String),

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Attendance view is no longer mounted")]
    ViewClosed,
}

impl AttendanceError {
    /// Short text for an inline notice or toast.
    pub fn notice(&self) -> String {
        match self {
            AttendanceError::Fetch(e) => format!("Failed to load roster: {}", e.user_message()),
            AttendanceError::Finalize(e) => {
                format!("Failed to finalize attendance: {}", e.user_message())
            }
            other => other.to_string(),
        }
    }
}
