//! Live attendance roster for a running class session.
//!
//! Mount a [`LiveAttendanceView`] with a [`SessionDescriptor`], a [`RosterApi`]
//! and a [`RealtimeChannel`]. The view counts down the check-in window, marks
//! students present as check-ins arrive, allows manual corrections once the
//! window has closed and submits the final roster exactly once.

pub mod api;
pub mod clock;
pub mod countdown;
pub mod error;
pub mod finalize;
pub mod listener;
pub mod realtime;
pub mod roster;
pub mod session;
pub mod state;
pub mod view;

pub use api::{HttpRosterApi, RosterApi};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AttendanceError, AttendanceResult};
pub use finalize::{FinalizeAck, FinalizedRoster, GatePhase};
pub use realtime::{ChannelSubscription, RealtimeChannel};
pub use roster::{LoadState, RosterEntry, RosterStats, StatusFilter};
pub use session::SessionDescriptor;
pub use state::ViewSnapshot;
pub use view::{LiveAttendanceView, ViewHandle, ViewOptions};
