//! The live-attendance state machine.
//!
//! `AttendanceState` owns the countdown, the roster and the finalize gate and
//! enforces how they gate each other. It performs no I/O: the view actor feeds
//! it ticks, check-ins, commands and backend results, and carries out the
//! fetches and submissions it asks for.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use util::http::ApiError;

use crate::countdown::{Countdown, CountdownState, CountdownTransition};
use crate::error::{AttendanceError, AttendanceResult};
use crate::finalize::{FinalizeAck, FinalizeGate, FinalizedRoster, GatePhase};
use crate::listener::CheckInEvent;
use crate::roster::{LoadState, MarkOutcome, RosterEntry, RosterStats, RosterStore};
use crate::session::SessionDescriptor;

/// What a check-in did to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInOutcome {
    Marked,
    AlreadyPresent,
    /// Student id not on the roster; counted, never inserted.
    Ignored,
    /// Roster not loaded yet; caller must start a fetch.
    FetchNeeded,
    /// Roster not loaded yet and a fetch is already in flight.
    FetchPending,
    /// Attendance already finalized; late events are dropped.
    Finalized,
}

/// Everything a renderer needs, computed from the live state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewSnapshot {
    pub session: SessionDescriptor,
    pub countdown: CountdownState,
    pub load_state: LoadState,
    pub entries: Vec<RosterEntry>,
    pub stats: RosterStats,
    pub gate: GatePhase,
    pub can_toggle: bool,
    pub can_finalize: bool,
    pub ignored_check_ins: u64,
    pub notice: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AttendanceState {
    session: SessionDescriptor,
    countdown: Countdown,
    roster: RosterStore,
    gate: FinalizeGate,
    ignored_check_ins: u64,
    notice: Option<String>,
}

impl AttendanceState {
    pub fn new(session: SessionDescriptor, now: DateTime<Utc>) -> Self {
        let countdown = Countdown::new(session.window_expires_at(), now);
        Self {
            session,
            countdown,
            roster: RosterStore::new(),
            gate: FinalizeGate::default(),
            ignored_check_ins: 0,
            notice: None,
        }
    }

    pub fn session(&self) -> &SessionDescriptor {
        &self.session
    }

    pub fn countdown(&self) -> CountdownState {
        self.countdown.state()
    }

    pub fn is_open(&self) -> bool {
        self.countdown.is_open()
    }

    pub fn roster(&self) -> &RosterStore {
        &self.roster
    }

    pub fn gate(&self) -> GatePhase {
        self.gate.phase()
    }

    pub fn ignored_check_ins(&self) -> u64 {
        self.ignored_check_ins
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn on_tick(&mut self, now: DateTime<Utc>) -> Option<CountdownTransition> {
        let transition = self.countdown.tick(now);
        if transition == Some(CountdownTransition::Closed) {
            tracing::info!(
                "Attendance window closed for session {} ({} of {} present)",
                self.session.id(),
                self.roster.stats().present,
                self.roster.len()
            );
        }
        transition
    }

    /// Applies a real-time check-in.
    ///
    /// Events that arrive before the first roster load are not queued; the
    /// fetch they trigger is expected to include them.
    pub fn on_check_in(&mut self, event: &CheckInEvent) -> CheckInOutcome {
        if self.gate.is_finalized() {
            tracing::debug!(
                "Ignoring check-in for {} after finalize",
                event.student_id
            );
            return CheckInOutcome::Finalized;
        }

        if !self.has_roster() {
            return if self.roster.begin_loading() {
                tracing::debug!(
                    "Check-in for {} before roster load; fetching roster",
                    event.student_id
                );
                CheckInOutcome::FetchNeeded
            } else {
                CheckInOutcome::FetchPending
            };
        }

        match self.roster.mark_present(&event.student_id) {
            MarkOutcome::Marked => {
                tracing::debug!("Student {} checked in", event.student_id);
                CheckInOutcome::Marked
            }
            MarkOutcome::AlreadyPresent => CheckInOutcome::AlreadyPresent,
            MarkOutcome::Unknown => {
                self.ignored_check_ins += 1;
                tracing::warn!(
                    "Ignoring check-in for student {} not on roster of session {}",
                    event.student_id,
                    self.session.id()
                );
                CheckInOutcome::Ignored
            }
        }
    }

    /// Asks for a fetch. Returns `false` if one is already in flight.
    ///
    /// Refused while a finalize is submitting or done, since the result could
    /// not be applied.
    pub fn begin_fetch(&mut self) -> AttendanceResult<bool> {
        self.gate.permits_edits()?;
        Ok(self.roster.begin_loading())
    }

    /// The channel dropped `missed` frames. Returns whether to refetch.
    ///
    /// Only an open window refetches. After close the local roster carries
    /// manual corrections and no further check-ins are expected.
    pub fn on_channel_lag(&mut self, missed: u64) -> bool {
        if !self.is_open() {
            tracing::warn!(
                "Missed {missed} real-time frame(s) for session {} after close; keeping local roster",
                self.session.id()
            );
            return false;
        }
        tracing::warn!(
            "Missed {missed} real-time frame(s) for session {}; refetching roster",
            self.session.id()
        );
        matches!(self.begin_fetch(), Ok(true))
    }

    /// The real-time channel is gone; check-ins will no longer arrive.
    pub fn on_channel_closed(&mut self, reason: &str) {
        if self.gate.is_finalized() {
            return;
        }
        let err = AttendanceError::Channel(reason.to_string());
        tracing::warn!("{err} (session {})", self.session.id());
        self.notice = Some(err.notice());
    }

    pub fn fetch_in_flight(&self) -> bool {
        self.roster.load_state() == LoadState::Loading
    }

    /// Loads a roster the caller already had, skipping the initial fetch.
    pub fn seed_roster(&mut self, entries: Vec<RosterEntry>) {
        self.roster.bulk_load(entries);
    }

    pub fn complete_fetch(
        &mut self,
        result: Result<Vec<RosterEntry>, ApiError>,
    ) -> AttendanceResult<()> {
        if self.gate.phase() != GatePhase::Ready {
            // a submitted or in-flight snapshot must not be replaced under it
            tracing::debug!("Discarding roster fetch result; finalize is {:?}", self.gate.phase());
            self.roster.fail_loading();
            return Ok(());
        }

        match result {
            Ok(entries) => {
                let dropped = self.roster.bulk_load(entries);
                if dropped > 0 {
                    tracing::warn!("Roster for session {} had {dropped} duplicate(s)", self.session.id());
                }
                tracing::info!(
                    "Roster loaded for session {}: {} students",
                    self.session.id(),
                    self.roster.len()
                );
                self.notice = None;
                Ok(())
            }
            Err(e) => {
                self.roster.fail_loading();
                let err = AttendanceError::Fetch(Arc::new(e));
                tracing::warn!("{err}");
                self.notice = Some(err.notice());
                Err(err)
            }
        }
    }

    /// Flips one student once the window is closed.
    pub fn toggle(&mut self, student_id: &str) -> AttendanceResult<bool> {
        if self.countdown.is_open() {
            return Err(AttendanceError::WindowOpen);
        }
        self.gate.permits_edits()?;
        if !self.has_roster() {
            return Err(AttendanceError::RosterNotLoaded);
        }

        let present = self
            .roster
            .toggle(student_id)
            .ok_or_else(|| AttendanceError::UnknownStudent(student_id.to_string()))?;
        tracing::debug!("Student {student_id} manually set present={present}");
        Ok(present)
    }

    /// Starts a finalize and returns the snapshot to submit.
    pub fn begin_finalize(&mut self) -> AttendanceResult<FinalizedRoster> {
        if self.countdown.is_open() {
            return Err(AttendanceError::WindowOpen);
        }
        if !self.has_roster() {
            return Err(AttendanceError::RosterNotLoaded);
        }
        self.gate.begin()?;
        Ok(self.roster.snapshot())
    }

    pub fn complete_finalize(
        &mut self,
        result: Result<FinalizeAck, ApiError>,
    ) -> AttendanceResult<FinalizeAck> {
        match result {
            Ok(ack) => {
                self.gate.succeed();
                self.notice = None;
                tracing::info!("Attendance finalized for session {}", self.session.id());
                Ok(ack)
            }
            Err(e) => {
                self.gate.fail();
                let err = AttendanceError::Finalize(Arc::new(e));
                tracing::warn!("{err}");
                self.notice = Some(err.notice());
                Err(err)
            }
        }
    }

    pub fn can_toggle(&self) -> bool {
        !self.countdown.is_open() && self.gate.phase() == GatePhase::Ready && self.has_roster()
    }

    pub fn can_finalize(&self) -> bool {
        self.can_toggle()
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            session: self.session.clone(),
            countdown: self.countdown.state(),
            load_state: self.roster.load_state(),
            entries: self.roster.entries().to_vec(),
            stats: self.roster.stats(),
            gate: self.gate.phase(),
            can_toggle: self.can_toggle(),
            can_finalize: self.can_finalize(),
            ignored_check_ins: self.ignored_check_ins,
            notice: self.notice.clone(),
        }
    }

    fn has_roster(&self) -> bool {
        self.roster.has_loaded()
    }
}
