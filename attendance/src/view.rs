//! The mounted live-attendance view.
//!
//! [`LiveAttendanceView::mount`] spawns one actor task that exclusively owns
//! an [`AttendanceState`] and interleaves its inputs with `tokio::select!`:
//!
//! - the countdown tick (only while the window is open),
//! - frames from the session's real-time subscription,
//! - completions of roster fetches and finalize submissions,
//! - commands from the [`ViewHandle`].
//!
//! Backend calls run in tasks owned by the actor, so unmounting cancels them
//! along with the tick and the subscription.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use common::AppConfig;
use futures_util::FutureExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use util::http::{ApiError, ApiResult};

use crate::api::RosterApi;
use crate::clock::{Clock, SystemClock};
use crate::countdown::CountdownTransition;
use crate::error::{AttendanceError, AttendanceResult};
use crate::finalize::FinalizeAck;
use crate::listener::{Frame, parse_frame};
use crate::realtime::{ChannelSubscription, RealtimeChannel};
use crate::roster::RosterEntry;
use crate::session::SessionDescriptor;
use crate::state::{AttendanceState, CheckInOutcome, ViewSnapshot};

const COMMAND_CAPACITY: usize = 32;

pub struct ViewOptions {
    pub tick_interval: Duration,
    /// Roster the caller already holds; skips the fetch on mount.
    pub initial_roster: Option<Vec<RosterEntry>>,
    pub clock: Arc<dyn Clock>,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1000),
            initial_roster: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl ViewOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(config.countdown_tick_ms.max(1)),
            ..Self::default()
        }
    }

    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_initial_roster(mut self, entries: Vec<RosterEntry>) -> Self {
        self.initial_roster = Some(entries);
        self
    }
}

enum Command {
    Toggle {
        student_id: String,
        reply: oneshot::Sender<AttendanceResult<bool>>,
    },
    Finalize {
        reply: oneshot::Sender<AttendanceResult<FinalizeAck>>,
    },
    Reload {
        reply: oneshot::Sender<AttendanceResult<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<ViewSnapshot>,
    },
}

enum Completion {
    Fetch(Result<Vec<RosterEntry>, ApiError>),
    Finalize(Result<FinalizeAck, ApiError>),
}

pub struct LiveAttendanceView;

impl LiveAttendanceView {
    /// Subscribes to the session topic and starts the view.
    ///
    /// The subscription is in place before the initial fetch is issued, so a
    /// check-in is either in the fetched roster or delivered on the channel.
    pub async fn mount(
        session: SessionDescriptor,
        api: Arc<dyn RosterApi>,
        channel: Arc<dyn RealtimeChannel>,
        options: ViewOptions,
    ) -> AttendanceResult<ViewHandle> {
        let subscription = ChannelSubscription::open(channel, &session.topic()).await?;

        let ViewOptions {
            tick_interval,
            initial_roster,
            clock,
        } = options;

        let mut state = AttendanceState::new(session, clock.now());
        if let Some(entries) = initial_roster {
            state.seed_roster(entries);
        }
        tracing::info!(
            "Mounted attendance view for session {} ({}s remaining)",
            state.session().id(),
            state.countdown().seconds_remaining
        );

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (snap_tx, snap_rx) = watch::channel(state.snapshot());

        let actor = ViewActor {
            state,
            api,
            clock,
            subscription,
            commands: cmd_rx,
            snapshots: snap_tx,
            tasks: JoinSet::new(),
            pending_reloads: Vec::new(),
            pending_finalize: None,
        };
        let task = tokio::spawn(actor.run(tick_interval));

        Ok(ViewHandle {
            commands: cmd_tx,
            snapshots: snap_rx,
            task: Some(task),
        })
    }
}

/// Handle to a mounted view. Dropping it unmounts the view.
pub struct ViewHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<ViewSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl ViewHandle {
    /// Flips one student's status. Only allowed once the window has closed.
    pub async fn toggle(&self, student_id: &str) -> AttendanceResult<bool> {
        let student_id = student_id.to_string();
        self.request(|reply| Command::Toggle { student_id, reply })
            .await?
    }

    /// Submits the roster; resolves when the backend answers.
    pub async fn finalize(&self) -> AttendanceResult<FinalizeAck> {
        self.request(|reply| Command::Finalize { reply }).await?
    }

    /// Refetches the roster; resolves when the fetch completes.
    pub async fn reload(&self) -> AttendanceResult<()> {
        self.request(|reply| Command::Reload { reply }).await?
    }

    /// Current state, ordered after every command sent before it.
    pub async fn snapshot(&self) -> AttendanceResult<ViewSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Receiver that observes every published state change.
    pub fn watch(&self) -> watch::Receiver<ViewSnapshot> {
        self.snapshots.clone()
    }

    /// Stops the view and waits until its tick, subscription and in-flight
    /// backend calls are gone.
    pub async fn unmount(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> AttendanceResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| AttendanceError::ViewClosed)?;
        rx.await.map_err(|_| AttendanceError::ViewClosed)
    }
}

impl Drop for ViewHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct ViewActor {
    state: AttendanceState,
    api: Arc<dyn RosterApi>,
    clock: Arc<dyn Clock>,
    subscription: ChannelSubscription,
    commands: mpsc::Receiver<Command>,
    snapshots: watch::Sender<ViewSnapshot>,
    tasks: JoinSet<Completion>,
    pending_reloads: Vec<oneshot::Sender<AttendanceResult<()>>>,
    pending_finalize: Option<oneshot::Sender<AttendanceResult<FinalizeAck>>>,
}

impl ViewActor {
    async fn run(mut self, tick_interval: Duration) {
        if !self.state.roster().has_loaded() {
            self.fetch();
        }

        let mut ticker = time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick(), if self.state.is_open() => {
                    if self.state.on_tick(self.clock.now()) == Some(CountdownTransition::Closed) {
                        tracing::debug!("Countdown stopped for session {}", self.state.session().id());
                    }
                }
                frame = self.subscription.recv() => self.on_frame(frame),
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => match joined {
                    Ok(done) => self.on_completion(done),
                    // only reachable through abort, which also ends this loop
                    Err(e) => tracing::warn!("Attendance backend task cancelled: {e}"),
                },
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => break,
                },
            }
            self.publish();
        }

        tracing::info!("Attendance view for session {} unmounted", self.state.session().id());
    }

    fn on_frame(&mut self, frame: Result<String, RecvError>) {
        let raw = match frame {
            Ok(raw) => raw,
            Err(RecvError::Lagged(missed)) => {
                if self.state.on_channel_lag(missed) {
                    self.spawn_fetch();
                }
                return;
            }
            Err(RecvError::Closed) => {
                let reason = format!(
                    "'{}' closed; live check-ins are paused",
                    self.subscription.topic()
                );
                self.state.on_channel_closed(&reason);
                self.subscription.park();
                return;
            }
        };

        match parse_frame(&raw, self.state.session().id()) {
            Frame::CheckIn(event) => {
                if self.state.on_check_in(&event) == CheckInOutcome::FetchNeeded {
                    self.spawn_fetch();
                }
            }
            Frame::Ignored(reason) => tracing::debug!("Ignoring real-time frame: {reason:?}"),
            Frame::Malformed(e) => tracing::warn!("Skipping malformed real-time frame: {e}"),
        }
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Toggle { student_id, reply } => {
                let result = self.state.toggle(&student_id);
                if let Err(e) = &result {
                    tracing::debug!("Toggle of {student_id} rejected: {e}");
                }
                self.publish();
                let _ = reply.send(result);
            }
            Command::Finalize { reply } => match self.state.begin_finalize() {
                Ok(roster) => {
                    tracing::info!(
                        "Submitting attendance for session {} ({} of {} present)",
                        self.state.session().id(),
                        roster.present_count(),
                        roster.len()
                    );
                    let api = Arc::clone(&self.api);
                    let session_id = self.state.session().id().to_string();
                    self.tasks.spawn(async move {
                        Completion::Finalize(guarded(api.finalize(&session_id, &roster)).await)
                    });
                    self.pending_finalize = Some(reply);
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Reload { reply } => match self.state.begin_fetch() {
                Ok(started) => {
                    if started {
                        self.spawn_fetch();
                    }
                    self.pending_reloads.push(reply);
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Snapshot { reply } => {
                let _ = reply.send(self.state.snapshot());
            }
        }
    }

    fn on_completion(&mut self, done: Completion) {
        match done {
            Completion::Fetch(result) => {
                let outcome = self.state.complete_fetch(result);
                self.publish();
                for reply in self.pending_reloads.drain(..) {
                    let _ = reply.send(outcome.clone());
                }
            }
            Completion::Finalize(result) => {
                let outcome = self.state.complete_finalize(result);
                self.publish();
                if let Some(reply) = self.pending_finalize.take() {
                    let _ = reply.send(outcome);
                }
            }
        }
    }

    /// Starts a fetch unless one is already running or a finalize holds the roster.
    fn fetch(&mut self) {
        if let Ok(true) = self.state.begin_fetch() {
            self.spawn_fetch();
        }
    }

    fn spawn_fetch(&mut self) {
        let api = Arc::clone(&self.api);
        let session_id = self.state.session().id().to_string();
        tracing::debug!("Fetching roster for session {session_id}");
        self.tasks
            .spawn(async move { Completion::Fetch(guarded(api.fetch_roster(&session_id)).await) });
    }

    fn publish(&self) {
        let next = self.state.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

/// Runs a backend call, turning a panic inside it into an error result so the
/// waiting caller is answered and the state can be retried.
async fn guarded<T>(call: impl Future<Output = ApiResult<T>>) -> ApiResult<T> {
    AssertUnwindSafe(call)
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let reason = panic_reason(panic.as_ref());
            tracing::error!("Attendance backend call panicked: {reason}");
            Err(ApiError::Aborted(reason))
        })
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
