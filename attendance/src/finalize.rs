//! Finalize gate: the one-shot submission of the roster as the permanent record.

use serde::{Deserialize, Serialize};

use crate::error::{AttendanceError, AttendanceResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedEntry {
    #[serde(alias = "studentId")]
    pub student_id: String,
    pub present: bool,
}

/// Snapshot of the roster at submission time, in store order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FinalizedRoster {
    pub entries: Vec<FinalizedEntry>,
}

impl FinalizedRoster {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|e| e.present).count()
    }
}

/// Body of the finalize request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub session_id: String,
    pub roster: FinalizedRoster,
}

/// Backend acknowledgement of a finalize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeAck {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub recorded: usize,
    #[serde(default)]
    pub finalized_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePhase {
    Ready,
    Submitting,
    Finalized,
}

/// Tracks the finalize lifecycle: `Ready → Submitting → Finalized`, falling
/// back to `Ready` when a submission fails.
#[derive(Debug, Clone)]
pub struct FinalizeGate {
    phase: GatePhase,
}

impl Default for FinalizeGate {
    fn default() -> Self {
        Self {
            phase: GatePhase::Ready,
        }
    }
}

impl FinalizeGate {
    pub fn phase(&self) -> GatePhase {
        self.phase
    }

    pub fn is_finalized(&self) -> bool {
        self.phase == GatePhase::Finalized
    }

    /// Whether local roster edits are currently allowed by the gate.
    pub fn permits_edits(&self) -> AttendanceResult<()> {
        match self.phase {
            GatePhase::Ready => Ok(()),
            GatePhase::Submitting => Err(AttendanceError::FinalizeInProgress),
            GatePhase::Finalized => Err(AttendanceError::AlreadyFinalized),
        }
    }

    /// Enters `Submitting`. The window-closed precondition is checked by the caller.
    pub fn begin(&mut self) -> AttendanceResult<()> {
        self.permits_edits()?;
        self.phase = GatePhase::Submitting;
        Ok(())
    }

    pub fn succeed(&mut self) {
        if self.phase == GatePhase::Submitting {
            self.phase = GatePhase::Finalized;
        }
    }

    pub fn fail(&mut self) {
        if self.phase == GatePhase::Submitting {
            self.phase = GatePhase::Ready;
        }
    }
}
