use async_trait::async_trait;
use attendance::finalize::FinalizedEntry;
use attendance::listener::CHECK_IN_EVENT;
use attendance::{
    AttendanceError, FinalizeAck, FinalizedRoster, GatePhase, LiveAttendanceView, LoadState,
    ManualClock, RealtimeChannel, RosterApi, RosterEntry, SessionDescriptor, ViewHandle,
    ViewOptions, ViewSnapshot,
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use reqwest::StatusCode;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use util::http::{ApiError, ApiResult};
use util::ws::{WebSocketManager, emit};

/// Scripted backend: serves a fixed roster and records submissions.
struct FakeApi {
    roster: Mutex<Vec<RosterEntry>>,
    fetches: AtomicUsize,
    fetch_failures: Mutex<VecDeque<String>>,
    finalize_failures: Mutex<VecDeque<String>>,
    finalized: Mutex<Vec<FinalizedRoster>>,
    hold_fetches: AtomicBool,
    fetch_gate: Semaphore,
    hold_finalize: AtomicBool,
    finalize_gate: Semaphore,
    crash_next_fetch: AtomicBool,
    crash_next_finalize: AtomicBool,
}

impl FakeApi {
    fn with_roster(entries: Vec<RosterEntry>) -> Arc<Self> {
        Arc::new(Self {
            roster: Mutex::new(entries),
            fetches: AtomicUsize::new(0),
            fetch_failures: Mutex::default(),
            finalize_failures: Mutex::default(),
            finalized: Mutex::default(),
            hold_fetches: AtomicBool::new(false),
            fetch_gate: Semaphore::new(0),
            hold_finalize: AtomicBool::new(false),
            finalize_gate: Semaphore::new(0),
            crash_next_fetch: AtomicBool::new(false),
            crash_next_finalize: AtomicBool::new(false),
        })
    }

    fn fail_next_fetch(&self, msg: &str) {
        self.fetch_failures.lock().unwrap().push_back(msg.into());
    }

    fn fail_next_finalize(&self, msg: &str) {
        self.finalize_failures.lock().unwrap().push_back(msg.into());
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn submissions(&self) -> Vec<FinalizedRoster> {
        self.finalized.lock().unwrap().clone()
    }
}

fn rejected(msg: String) -> ApiError {
    ApiError::Rejected {
        status: StatusCode::SERVICE_UNAVAILABLE,
        message: msg,
    }
}

#[async_trait]
impl RosterApi for FakeApi {
    async fn fetch_roster(&self, _session_id: &str) -> ApiResult<Vec<RosterEntry>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.hold_fetches.load(Ordering::SeqCst) {
            self.fetch_gate.acquire().await.unwrap().forget();
        }
        if self.crash_next_fetch.swap(false, Ordering::SeqCst) {
            panic!("roster decoder crashed");
        }
        if let Some(msg) = self.fetch_failures.lock().unwrap().pop_front() {
            return Err(rejected(msg));
        }
        Ok(self.roster.lock().unwrap().clone())
    }

    async fn finalize(&self, session_id: &str, roster: &FinalizedRoster) -> ApiResult<FinalizeAck> {
        if self.hold_finalize.load(Ordering::SeqCst) {
            self.finalize_gate.acquire().await.unwrap().forget();
        }
        if self.crash_next_finalize.swap(false, Ordering::SeqCst) {
            panic!("finalize client crashed");
        }
        if let Some(msg) = self.finalize_failures.lock().unwrap().pop_front() {
            return Err(rejected(msg));
        }
        self.finalized.lock().unwrap().push(roster.clone());
        Ok(FinalizeAck {
            session_id: session_id.to_string(),
            recorded: roster.len(),
            finalized_at: Some("2025-09-08T10:05:00Z".into()),
        })
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 8, 10, 0, 0).unwrap()
}

fn session(expires_in_secs: i64) -> SessionDescriptor {
    SessionDescriptor::new(
        "ses-1",
        "Computer Networks",
        "K7Q2M9XA",
        t0() + ChronoDuration::seconds(expires_in_secs),
    )
    .unwrap()
}

fn class_of(n: usize) -> Vec<RosterEntry> {
    (1..=n)
        .map(|i| RosterEntry::new(format!("S{i}"), format!("Student {i}"), format!("1EC21CS{i:03}")))
        .collect()
}

struct Harness {
    view: ViewHandle,
    api: Arc<FakeApi>,
    hub: WebSocketManager,
    clock: ManualClock,
}

async fn mount_with(expires_in_secs: i64, api: Arc<FakeApi>, hub: WebSocketManager) -> Harness {
    let clock = ManualClock::new(t0());
    let channel: Arc<dyn RealtimeChannel> = Arc::new(hub.clone());
    let view = LiveAttendanceView::mount(
        session(expires_in_secs),
        api.clone(),
        channel,
        ViewOptions::default().with_clock(clock.clone()),
    )
    .await
    .unwrap();
    Harness {
        view,
        api,
        hub,
        clock,
    }
}

async fn mount(expires_in_secs: i64, students: usize) -> Harness {
    mount_with(expires_in_secs, FakeApi::with_roster(class_of(students)), WebSocketManager::new()).await
}

async fn wait_until(view: &ViewHandle, pred: impl FnMut(&ViewSnapshot) -> bool) -> ViewSnapshot {
    let mut rx = view.watch();
    let snap = timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("timed out waiting for view state")
        .expect("view stopped");
    snap.clone()
}

async fn wait_loaded(view: &ViewHandle) -> ViewSnapshot {
    wait_until(view, |s| s.load_state == LoadState::Loaded).await
}

/// Lets the actor drain everything already queued for it.
async fn settle() {
    sleep(Duration::from_millis(50)).await;
}

async fn check_in(hub: &WebSocketManager, student_id: &str) {
    emit(
        hub,
        "attendance:session:ses-1",
        CHECK_IN_EVENT,
        &json!({ "student_id": student_id, "session_id": "ses-1", "method": "code" }),
    )
    .await;
}

fn present_ids(snap: &ViewSnapshot) -> Vec<&str> {
    snap.entries
        .iter()
        .filter(|e| e.present)
        .map(|e| e.student_id.as_str())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn countdown_closes_once_and_ignores_clock_skew() {
    let h = mount(3, 2).await;
    let snap = h.view.snapshot().await.unwrap();
    assert_eq!(snap.countdown.seconds_remaining, 3);
    assert!(snap.countdown.is_open);

    h.clock.advance(ChronoDuration::seconds(1));
    wait_until(&h.view, |s| s.countdown.seconds_remaining == 2).await;

    // wall clock steps back: remaining must not grow
    h.clock.set(t0());
    settle().await;
    assert_eq!(h.view.snapshot().await.unwrap().countdown.seconds_remaining, 2);

    h.clock.set(t0() + ChronoDuration::seconds(3));
    let closed = wait_until(&h.view, |s| !s.countdown.is_open).await;
    assert_eq!(closed.countdown.seconds_remaining, 0);

    h.clock.set(t0());
    settle().await;
    let after = h.view.snapshot().await.unwrap();
    assert!(!after.countdown.is_open);
    assert_eq!(after.countdown.seconds_remaining, 0);
}

#[tokio::test(start_paused = true)]
async fn expired_session_mounts_closed_and_editable() {
    let h = mount(-5, 3).await;
    let snap = wait_loaded(&h.view).await;
    assert_eq!(snap.countdown.seconds_remaining, 0);
    assert!(!snap.countdown.is_open);
    assert!(snap.can_toggle);
    assert!(snap.can_finalize);
}

#[tokio::test(start_paused = true)]
async fn check_in_marks_exactly_one_student() {
    let h = mount(60, 10).await;
    wait_loaded(&h.view).await;

    check_in(&h.hub, "S3").await;
    let snap = wait_until(&h.view, |s| s.stats.present == 1).await;
    assert_eq!(present_ids(&snap), ["S3"]);
    assert_eq!(snap.stats.total, 10);
    assert_eq!(snap.stats.absent, 9);
}

#[tokio::test(start_paused = true)]
async fn repeated_check_ins_are_idempotent() {
    let h = mount(60, 5).await;
    wait_loaded(&h.view).await;

    check_in(&h.hub, "S2").await;
    check_in(&h.hub, "S2").await;
    check_in(&h.hub, "S5").await;
    let snap = wait_until(&h.view, |s| s.entries[4].present).await;
    assert_eq!(present_ids(&snap), ["S2", "S5"]);
    assert_eq!(snap.entries.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn unknown_student_check_in_is_counted_not_inserted() {
    let h = mount(60, 10).await;
    let before = wait_loaded(&h.view).await;

    check_in(&h.hub, "S404").await;
    let snap = wait_until(&h.view, |s| s.ignored_check_ins == 1).await;
    assert_eq!(snap.entries, before.entries);
    assert_eq!(snap.stats.total, 10);
}

#[tokio::test(start_paused = true)]
async fn frames_for_other_sessions_and_events_are_ignored() {
    let h = mount(60, 3).await;
    let before = wait_loaded(&h.view).await;

    let topic = "attendance:session:ses-1";
    emit(&h.hub, topic, CHECK_IN_EVENT, &json!({ "student_id": "S1", "session_id": "ses-2" })).await;
    emit(&h.hub, topic, "attendance.session_updated", &json!({ "student_id": "S2" })).await;
    h.hub.broadcast(topic, "{not json").await;
    settle().await;

    let snap = h.view.snapshot().await.unwrap();
    assert_eq!(snap.entries, before.entries);
    assert_eq!(snap.ignored_check_ins, 0);
}

#[tokio::test(start_paused = true)]
async fn burst_of_early_check_ins_triggers_one_fetch() {
    let api = FakeApi::with_roster(class_of(3));
    api.fail_next_fetch("roster service warming up");
    let h = mount_with(60, api, WebSocketManager::new()).await;

    let failed = wait_until(&h.view, |s| s.notice.is_some()).await;
    assert_eq!(failed.load_state, LoadState::Idle);
    assert!(failed.notice.unwrap().contains("roster service warming up"));
    assert_eq!(h.api.fetches(), 1);

    h.api.hold_fetches.store(true, Ordering::SeqCst);
    for id in ["S1", "S2", "S3"] {
        check_in(&h.hub, id).await;
    }
    settle().await;
    assert_eq!(h.api.fetches(), 2);
    assert_eq!(h.view.snapshot().await.unwrap().load_state, LoadState::Loading);

    h.api.fetch_gate.add_permits(1);
    let snap = wait_loaded(&h.view).await;
    settle().await;
    assert_eq!(h.api.fetches(), 2);
    assert_eq!(snap.stats.total, 3);
    assert!(snap.notice.is_none());
}

#[tokio::test(start_paused = true)]
async fn toggle_is_rejected_while_window_is_open() {
    let h = mount(60, 3).await;
    let before = wait_loaded(&h.view).await;
    assert!(!before.can_toggle);

    let err = h.view.toggle("S1").await.unwrap_err();
    assert!(matches!(err, AttendanceError::WindowOpen));
    assert_eq!(h.view.snapshot().await.unwrap().entries, before.entries);

    let err = h.view.finalize().await.unwrap_err();
    assert!(matches!(err, AttendanceError::WindowOpen));
    assert!(h.api.submissions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn close_toggle_and_finalize_submits_full_roster() {
    let h = mount(30, 10).await;
    wait_loaded(&h.view).await;
    for id in ["S2", "S3", "S4", "S5", "S6", "S7", "S8"] {
        check_in(&h.hub, id).await;
    }
    wait_until(&h.view, |s| s.stats.present == 7).await;

    h.clock.advance(ChronoDuration::seconds(30));
    wait_until(&h.view, |s| !s.countdown.is_open).await;

    assert!(h.view.toggle("S1").await.unwrap());
    assert!(!h.view.toggle("S4").await.unwrap());
    let err = h.view.toggle("S99").await.unwrap_err();
    assert!(matches!(err, AttendanceError::UnknownStudent(id) if id == "S99"));

    let ack = h.view.finalize().await.unwrap();
    assert_eq!(ack.recorded, 10);

    let submitted = h.api.submissions();
    assert_eq!(submitted.len(), 1);
    let roster = &submitted[0];
    assert_eq!(roster.len(), 10);
    assert_eq!(roster.present_count(), 7);
    assert_eq!(
        roster.entries[0],
        FinalizedEntry {
            student_id: "S1".into(),
            present: true
        }
    );
    assert!(!roster.entries[3].present);
    let ids: Vec<String> = roster.entries.iter().map(|e| e.student_id.clone()).collect();
    let expected: Vec<String> = (1..=10).map(|i| format!("S{i}")).collect();
    assert_eq!(ids, expected);

    let snap = h.view.snapshot().await.unwrap();
    assert_eq!(snap.gate, GatePhase::Finalized);
    assert!(!snap.can_toggle && !snap.can_finalize);
    assert!(matches!(h.view.toggle("S2").await, Err(AttendanceError::AlreadyFinalized)));
    assert!(matches!(h.view.finalize().await, Err(AttendanceError::AlreadyFinalized)));
    assert!(matches!(h.view.reload().await, Err(AttendanceError::AlreadyFinalized)));

    // late check-ins do not touch the finalized roster
    check_in(&h.hub, "S9").await;
    settle().await;
    assert_eq!(h.view.snapshot().await.unwrap().entries, snap.entries);
}

#[tokio::test(start_paused = true)]
async fn failed_finalize_keeps_roster_for_retry() {
    let h = mount(-1, 4).await;
    wait_loaded(&h.view).await;
    h.view.toggle("S1").await.unwrap();
    h.view.toggle("S3").await.unwrap();
    let before = h.view.snapshot().await.unwrap();

    h.api.fail_next_finalize("gateway timeout");
    let err = h.view.finalize().await.unwrap_err();
    assert!(matches!(err, AttendanceError::Finalize(_)));
    assert!(err.notice().contains("gateway timeout"));

    let after = h.view.snapshot().await.unwrap();
    assert_eq!(after.entries, before.entries);
    assert_eq!(after.gate, GatePhase::Ready);
    assert!(after.notice.unwrap().contains("gateway timeout"));
    assert!(h.api.submissions().is_empty());

    h.view.finalize().await.unwrap();
    let submitted = h.api.submissions();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].present_count(), 2);

    let done = h.view.snapshot().await.unwrap();
    assert_eq!(done.gate, GatePhase::Finalized);
    assert!(done.notice.is_none());
}

#[tokio::test(start_paused = true)]
async fn second_finalize_while_submitting_is_rejected() {
    let h = mount(-1, 2).await;
    wait_loaded(&h.view).await;
    h.api.hold_finalize.store(true, Ordering::SeqCst);

    let (first, (second, toggle)) = tokio::join!(h.view.finalize(), async {
        settle().await;
        let second = h.view.finalize().await;
        let toggle = h.view.toggle("S1").await;
        assert_eq!(h.view.snapshot().await.unwrap().gate, GatePhase::Submitting);
        h.api.finalize_gate.add_permits(1);
        (second, toggle)
    });

    assert!(first.is_ok());
    assert!(matches!(second, Err(AttendanceError::FinalizeInProgress)));
    assert!(matches!(toggle, Err(AttendanceError::FinalizeInProgress)));
    assert_eq!(h.api.submissions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn reload_recovers_from_failed_fetch() {
    let api = FakeApi::with_roster(class_of(4));
    api.fail_next_fetch("database unavailable");
    let h = mount_with(60, api, WebSocketManager::new()).await;

    let failed = wait_until(&h.view, |s| s.notice.is_some()).await;
    assert_eq!(failed.load_state, LoadState::Idle);
    assert!(matches!(h.view.toggle("S1").await, Err(AttendanceError::WindowOpen)));

    h.view.reload().await.unwrap();
    let snap = h.view.snapshot().await.unwrap();
    assert_eq!(snap.load_state, LoadState::Loaded);
    assert_eq!(snap.stats.total, 4);
    assert!(snap.notice.is_none());
}

#[tokio::test(start_paused = true)]
async fn empty_class_is_loaded_not_pending() {
    let h = mount(-1, 0).await;
    let snap = wait_loaded(&h.view).await;
    assert!(snap.entries.is_empty());
    assert_eq!(snap.stats.total, 0);
    assert!(snap.can_finalize);

    let ack = h.view.finalize().await.unwrap();
    assert_eq!(ack.recorded, 0);
}

#[tokio::test(start_paused = true)]
async fn initial_roster_skips_fetch() {
    let api = FakeApi::with_roster(class_of(5));
    let hub = WebSocketManager::new();
    let channel: Arc<dyn RealtimeChannel> = Arc::new(hub.clone());
    let view = LiveAttendanceView::mount(
        session(60),
        api.clone(),
        channel,
        ViewOptions::default()
            .with_clock(ManualClock::new(t0()))
            .with_initial_roster(class_of(2)),
    )
    .await
    .unwrap();

    settle().await;
    let snap = view.snapshot().await.unwrap();
    assert_eq!(snap.load_state, LoadState::Loaded);
    assert_eq!(snap.stats.total, 2);
    assert_eq!(api.fetches(), 0);
}

#[tokio::test(start_paused = true)]
async fn lagging_subscriber_refetches_roster() {
    let h = mount_with(60, FakeApi::with_roster(class_of(3)), WebSocketManager::with_capacity(1)).await;
    wait_loaded(&h.view).await;
    assert_eq!(h.api.fetches(), 1);

    for id in ["S1", "S2", "S3", "S1", "S2"] {
        check_in(&h.hub, id).await;
    }
    settle().await;
    assert_eq!(h.api.fetches(), 2);
    assert_eq!(h.view.snapshot().await.unwrap().load_state, LoadState::Loaded);
}

#[tokio::test(start_paused = true)]
async fn closed_channel_leaves_view_usable() {
    let h = mount(-1, 2).await;
    wait_loaded(&h.view).await;

    h.hub.close_all().await;
    let snap = wait_until(&h.view, |s| s.notice.is_some()).await;
    assert!(snap.notice.unwrap().contains("closed"));

    assert!(h.view.toggle("S2").await.unwrap());
    assert_eq!(h.view.snapshot().await.unwrap().stats.present, 1);
}

#[tokio::test(start_paused = true)]
async fn lag_after_close_keeps_manual_toggles() {
    let h = mount_with(-1, FakeApi::with_roster(class_of(3)), WebSocketManager::with_capacity(1)).await;
    wait_loaded(&h.view).await;
    assert!(h.view.toggle("S1").await.unwrap());

    // late frames overflow the one-slot channel
    for _ in 0..5 {
        check_in(&h.hub, "S404").await;
    }
    wait_until(&h.view, |s| s.ignored_check_ins >= 1).await;
    settle().await;

    assert_eq!(h.api.fetches(), 1);
    let snap = h.view.snapshot().await.unwrap();
    assert_eq!(snap.load_state, LoadState::Loaded);
    assert_eq!(present_ids(&snap), ["S1"]);

    h.view.finalize().await.unwrap();
    let submitted = h.api.submissions();
    assert_eq!(submitted[0].present_count(), 1);
    assert!(submitted[0].entries[0].present);
}

#[tokio::test(start_paused = true)]
async fn reload_keeps_manual_toggles() {
    let h = mount(-1, 3).await;
    wait_loaded(&h.view).await;
    h.view.toggle("S2").await.unwrap();

    h.view.reload().await.unwrap();
    assert_eq!(h.api.fetches(), 2);
    assert_eq!(present_ids(&h.view.snapshot().await.unwrap()), ["S2"]);
}

#[tokio::test(start_paused = true)]
async fn reload_while_submitting_is_rejected() {
    let h = mount(-1, 2).await;
    wait_loaded(&h.view).await;
    h.api.hold_finalize.store(true, Ordering::SeqCst);

    let (finalized, reload) = tokio::join!(h.view.finalize(), async {
        settle().await;
        let reload = h.view.reload().await;
        h.api.finalize_gate.add_permits(1);
        reload
    });

    assert!(finalized.is_ok());
    assert!(matches!(reload, Err(AttendanceError::FinalizeInProgress)));
    assert_eq!(h.api.fetches(), 1);
}

#[tokio::test(start_paused = true)]
async fn crashed_finalize_is_reported_and_retryable() {
    let h = mount(-1, 3).await;
    wait_loaded(&h.view).await;
    h.view.toggle("S3").await.unwrap();
    h.api.crash_next_finalize.store(true, Ordering::SeqCst);

    let err = timeout(Duration::from_secs(5), h.view.finalize())
        .await
        .expect("finalize was never answered")
        .unwrap_err();
    assert!(matches!(&err, AttendanceError::Finalize(e) if matches!(**e, ApiError::Aborted(_))));
    assert!(err.notice().contains("finalize client crashed"));

    let snap = h.view.snapshot().await.unwrap();
    assert_eq!(snap.gate, GatePhase::Ready);
    assert!(snap.can_toggle);
    assert!(h.view.toggle("S1").await.unwrap());

    h.view.finalize().await.unwrap();
    let submitted = h.api.submissions();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].present_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn crashed_fetch_can_be_reloaded() {
    let api = FakeApi::with_roster(class_of(2));
    api.crash_next_fetch.store(true, Ordering::SeqCst);
    let h = mount_with(60, api, WebSocketManager::new()).await;

    let failed = wait_until(&h.view, |s| s.notice.is_some()).await;
    assert_eq!(failed.load_state, LoadState::Idle);
    assert!(failed.notice.unwrap().contains("roster decoder crashed"));

    timeout(Duration::from_secs(5), h.view.reload())
        .await
        .expect("reload was never answered")
        .unwrap();
    assert_eq!(h.view.snapshot().await.unwrap().stats.total, 2);
}

#[tokio::test(start_paused = true)]
async fn unmount_releases_subscription() {
    let h = mount(60, 2).await;
    let topic = "attendance:session:ses-1";
    wait_loaded(&h.view).await;
    assert_eq!(h.hub.subscriber_count(topic).await, 1);

    let watcher = h.view.watch();
    h.view.unmount().await;
    assert_eq!(h.hub.subscriber_count(topic).await, 0);
    assert!(watcher.has_changed().is_err());

    settle().await;
    assert!(!h.hub.has_topic(topic).await);
}

#[tokio::test(start_paused = true)]
async fn dropping_handle_releases_subscription() {
    let hub = WebSocketManager::new();
    let topic = "attendance:session:ses-1";
    {
        let h = mount_with(60, FakeApi::with_roster(class_of(2)), hub.clone()).await;
        wait_loaded(&h.view).await;
        assert_eq!(hub.subscriber_count(topic).await, 1);
    }
    settle().await;
    assert_eq!(hub.subscriber_count(topic).await, 0);
}
