//! Attendance window countdown.
//!
//! The remaining time is always recomputed from the absolute expiry and the
//! current wall-clock time, never by decrementing a stored counter, so a
//! suspended process picks up the right value on its next tick.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Derived countdown view; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountdownState {
    pub seconds_remaining: u64,
    pub is_open: bool,
}

/// Reported by [`Countdown::tick`] when the window state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownTransition {
    Closed,
}

#[derive(Debug, Clone)]
pub struct Countdown {
    expires_at: DateTime<Utc>,
    state: CountdownState,
}

/// `max(0, floor((expires_at - now) / 1s))`.
pub fn seconds_until(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (expires_at - now).num_milliseconds();
    if millis <= 0 { 0 } else { (millis / 1000) as u64 }
}

impl Countdown {
    pub fn new(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let seconds_remaining = seconds_until(expires_at, now);
        Self {
            expires_at,
            state: CountdownState {
                seconds_remaining,
                is_open: seconds_remaining > 0,
            },
        }
    }

    pub fn state(&self) -> CountdownState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Recomputes from `now`.
    ///
    /// `seconds_remaining` never increases, even if the wall clock steps back,
    /// and once the window has closed further ticks change nothing.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<CountdownTransition> {
        if !self.state.is_open {
            return None;
        }

        let computed = seconds_until(self.expires_at, now);
        self.state.seconds_remaining = computed.min(self.state.seconds_remaining);

        if self.state.seconds_remaining == 0 {
            self.state.is_open = false;
            return Some(CountdownTransition::Closed);
        }
        None
    }
}
