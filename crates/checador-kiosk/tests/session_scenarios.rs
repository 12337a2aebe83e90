//! End-to-end behaviour of a kiosk session against the in-memory registry
//! and the fake event channel.
//!
//! Every test runs on a paused clock, so settle delays elapse instantly but
//! are still measured exactly.

use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, sleep, timeout};

use checador_core::{ReaderId, ReservationListEntry, ScanEvent, SessionId, Subject};
use checador_kiosk::{
    KioskSession, PendingRequest, ScanMachine, ScanState, SessionControl, SessionError,
    SessionSnapshot, SettleConfig,
};
use checador_network::{
    ChannelCall, FakeChannel, InMemoryRegistry, ReaderRegistry, RegistryCall, ReservationClient,
    ReservationError, ScanServiceError,
};

const WAIT_LIMIT: Duration = Duration::from_secs(60);

fn reader() -> ReaderId {
    ReaderId::new("LECTOR-01").unwrap()
}

fn session_id() -> SessionId {
    SessionId::new("kiosk-a").unwrap()
}

fn ana() -> Subject {
    Subject::new("7", "Ana Ruiz")
}

async fn wait(
    control: &SessionControl,
    predicate: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    timeout(WAIT_LIMIT, control.wait_for(predicate))
        .await
        .expect("condition not reached")
        .expect("session dropped")
}

struct Harness<R> {
    registry: InMemoryRegistry,
    channel: FakeChannel,
    session: KioskSession<R, FakeChannel>,
    control: SessionControl,
}

fn harness_with<R: ReaderRegistry>(
    registry: InMemoryRegistry,
    client_registry: R,
    channel: (FakeChannel, checador_network::ChannelEvents),
    quick_mode: bool,
) -> Harness<R> {
    let (channel, events) = channel;
    let client = ReservationClient::new(client_registry, session_id());
    let machine = ScanMachine::builder(reader())
        .with_settle(SettleConfig::default())
        .with_quick_mode(quick_mode)
        .build();

    let (session, control) = KioskSession::new(client, channel.clone(), events, machine);
    Harness {
        registry,
        channel,
        session,
        control,
    }
}

fn harness() -> Harness<InMemoryRegistry> {
    let registry = InMemoryRegistry::with_readers([reader()]);
    harness_with(registry.clone(), registry, FakeChannel::new(), false)
}

fn count_teardown_calls(h: &Harness<impl ReaderRegistry>) -> (usize, usize, usize) {
    (
        h.registry
            .count_calls(|c| matches!(c, RegistryCall::StopScanning(_))),
        h.channel
            .count_calls(|c| matches!(c, ChannelCall::Unsubscribe(_))),
        h.registry
            .count_calls(|c| matches!(c, RegistryCall::Release(..))),
    )
}

#[tokio::test(start_paused = true)]
async fn test_scenario_a_setup_reaches_ready() {
    let mut h = harness();
    let (registry, channel, control) = (h.registry.clone(), h.channel.clone(), h.control.clone());

    let script = async {
        let snapshot = wait(&control, |s| s.state == ScanState::Ready).await;
        assert!(snapshot.channel_connected);
        assert_eq!(snapshot.pending, None);

        assert_eq!(registry.holder(&reader()), Some(session_id()));
        assert!(registry.is_scanning(&reader()));
        assert_eq!(channel.subscriptions().len(), 1);
        control.shutdown();
    };
    tokio::join!(h.session.run(), script);

    assert_eq!(
        registry.calls()[..2],
        [
            RegistryCall::Reserve(reader(), session_id()),
            RegistryCall::StartScanning(reader(), session_id()),
        ]
    );
    assert!(registry.holder(&reader()).is_none());
    assert!(h.session.machine().is_torn_down());
}

#[tokio::test(start_paused = true)]
async fn test_ready_waits_for_channel_connection() {
    let registry = InMemoryRegistry::with_readers([reader()]);
    let mut h = harness_with(registry.clone(), registry, FakeChannel::manual(), false);
    let (registry, channel, control) = (h.registry.clone(), h.channel.clone(), h.control.clone());

    let script = async {
        sleep(Duration::from_secs(1)).await;
        assert_eq!(control.snapshot().state, ScanState::Idle);
        assert_eq!(registry.holder(&reader()), Some(session_id()));
        assert_eq!(
            registry.count_calls(|c| matches!(c, RegistryCall::StartScanning(..))),
            0
        );

        channel.emit_connected();
        wait(&control, |s| s.state == ScanState::Ready).await;
        control.shutdown();
    };
    tokio::join!(h.session.run(), script);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_b_conflict_is_error_without_start() {
    let mut h = harness();
    let other = SessionId::new("kiosk-b").unwrap();
    h.registry.reserve(&reader(), &other).await.unwrap();
    let (registry, channel, control) = (h.registry.clone(), h.channel.clone(), h.control.clone());

    let script = async {
        let snapshot = wait(&control, |s| s.state == ScanState::Error).await;
        assert_eq!(
            snapshot.last_error,
            Some(SessionError::Reservation(ReservationError::already_reserved(
                "LECTOR-01"
            )))
        );
        assert!(snapshot.status_message().contains("already reserved"));
        control.shutdown();
    };
    tokio::join!(h.session.run(), script);

    assert_eq!(
        registry.count_calls(|c| matches!(c, RegistryCall::StartScanning(..))),
        0
    );
    assert_eq!(channel.count_calls(|c| matches!(c, ChannelCall::Subscribe(_))), 0);
    assert_eq!(registry.holder(&reader()), Some(other));
}

#[tokio::test(start_paused = true)]
async fn test_scenario_c_recognized_scan_settles_back_to_ready() {
    let mut h = harness();
    let (channel, control) = (h.channel.clone(), h.control.clone());

    let script = async {
        wait(&control, |s| s.state == ScanState::Ready).await;

        assert!(channel.emit_scan(ScanEvent::identified(reader(), ana(), Utc::now())));
        let shown = Instant::now();
        let snapshot = wait(&control, |s| s.state == ScanState::Success).await;
        assert_eq!(
            snapshot.last_subject.as_ref().map(|s| s.name.as_str()),
            Some("Ana Ruiz")
        );
        assert_eq!(snapshot.recent_scans.len(), 1);

        let snapshot = wait(&control, |s| s.state == ScanState::Ready).await;
        assert_eq!(shown.elapsed(), Duration::from_secs(5));
        assert!(snapshot.last_subject.is_none());
        control.shutdown();
    };
    tokio::join!(h.session.run(), script);
}

#[tokio::test(start_paused = true)]
async fn test_unrecognized_scan_settles_after_short_delay() {
    let mut h = harness();
    let (channel, control) = (h.channel.clone(), h.control.clone());

    let script = async {
        wait(&control, |s| s.state == ScanState::Ready).await;

        channel.emit_scan(ScanEvent::unidentified(reader(), Utc::now()));
        let shown = Instant::now();
        wait(&control, |s| s.state == ScanState::Failed).await;
        wait(&control, |s| s.state == ScanState::Ready).await;
        assert_eq!(shown.elapsed(), Duration::from_secs(2));
        control.shutdown();
    };
    tokio::join!(h.session.run(), script);
}

#[tokio::test(start_paused = true)]
async fn test_quick_mode_hides_subject_and_settles_fast() {
    let mut h = harness();
    let (channel, control) = (h.channel.clone(), h.control.clone());

    let script = async {
        wait(&control, |s| s.state == ScanState::Ready).await;
        control.set_quick_mode(true);
        wait(&control, |s| s.quick_mode).await;

        channel.emit_scan(ScanEvent::identified(reader(), ana(), Utc::now()));
        let shown = Instant::now();
        let snapshot = wait(&control, |s| s.state == ScanState::Success).await;
        assert!(snapshot.last_subject.is_none());
        assert_eq!(snapshot.recent_scans[0].subject, ana());

        wait(&control, |s| s.state == ScanState::Ready).await;
        assert_eq!(shown.elapsed(), Duration::from_millis(1500));
        control.shutdown();
    };
    tokio::join!(h.session.run(), script);
}

#[tokio::test(start_paused = true)]
async fn test_second_scan_replaces_pending_settle() {
    let mut h = harness();
    let (channel, control) = (h.channel.clone(), h.control.clone());

    let script = async {
        wait(&control, |s| s.state == ScanState::Ready).await;

        channel.emit_scan(ScanEvent::identified(reader(), ana(), Utc::now()));
        wait(&control, |s| s.state == ScanState::Success).await;

        sleep(Duration::from_secs(4)).await;
        channel.emit_scan(ScanEvent::unidentified(reader(), Utc::now()));
        let replaced = Instant::now();
        wait(&control, |s| s.state == ScanState::Failed).await;

        wait(&control, |s| s.state == ScanState::Ready).await;
        assert_eq!(replaced.elapsed(), Duration::from_secs(2));
        control.shutdown();
    };
    tokio::join!(h.session.run(), script);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_e_reconnect_resubscribes_without_error() {
    let mut h = harness();
    let (channel, control) = (h.channel.clone(), h.control.clone());

    let script = async {
        wait(&control, |s| s.state == ScanState::Ready).await;

        channel.emit_disconnected("broker restart");
        let snapshot = wait(&control, |s| !s.channel_connected).await;
        assert_eq!(snapshot.state, ScanState::Ready);
        assert!(snapshot.last_error.is_none());
        assert!(channel.subscriptions().is_empty());

        channel.emit_connected();
        wait(&control, |s| s.channel_connected).await;
        assert_eq!(channel.subscriptions().len(), 1);
        assert_eq!(
            channel.count_calls(|c| matches!(c, ChannelCall::Subscribe(_))),
            2
        );

        assert!(channel.emit_scan(ScanEvent::identified(reader(), ana(), Utc::now())));
        wait(&control, |s| s.state == ScanState::Success).await;
        control.shutdown();
    };
    tokio::join!(h.session.run(), script);

    let (stops, unsubscribes, releases) = count_teardown_calls(&h);
    assert_eq!((stops, unsubscribes, releases), (1, 1, 1));
    assert_eq!(
        h.registry
            .count_calls(|c| matches!(c, RegistryCall::StartScanning(..))),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_start_is_error_and_compensated() {
    let mut h = harness();
    h.registry.fail_next_start("sensor not found");
    let (registry, control) = (h.registry.clone(), h.control.clone());

    let script = async {
        let snapshot = wait(&control, |s| s.state == ScanState::Error).await;
        assert_eq!(
            snapshot.last_error,
            Some(SessionError::ScanService(ScanServiceError::start_failed(
                "LECTOR-01",
                "sensor not found"
            )))
        );
        assert!(registry.holder(&reader()).is_none());
        control.shutdown();
    };
    tokio::join!(h.session.run(), script);
}

#[tokio::test(start_paused = true)]
async fn test_reinitialize_recovers_from_error() {
    let mut h = harness();
    h.registry.fail_next_start("sensor busy");
    let (registry, control) = (h.registry.clone(), h.control.clone());

    let script = async {
        wait(&control, |s| s.state == ScanState::Error).await;

        control.reinitialize();
        let snapshot = wait(&control, |s| s.state == ScanState::Ready).await;
        assert!(snapshot.last_error.is_none());
        assert_eq!(registry.holder(&reader()), Some(session_id()));
        assert!(registry.is_scanning(&reader()));
        control.shutdown();
    };
    tokio::join!(h.session.run(), script);
}

#[tokio::test(start_paused = true)]
async fn test_channel_failure_before_first_connect_is_error() {
    let registry = InMemoryRegistry::with_readers([reader()]);
    let mut h = harness_with(registry.clone(), registry, FakeChannel::manual(), false);
    let (channel, control) = (h.channel.clone(), h.control.clone());

    let script = async {
        wait(&control, |s| s.state == ScanState::Idle && s.pending.is_none()).await;
        sleep(Duration::from_millis(10)).await;

        channel.emit_error("connection refused");
        let snapshot = wait(&control, |s| s.state == ScanState::Error).await;
        assert_eq!(
            snapshot.last_error,
            Some(SessionError::channel("connection refused"))
        );

        // Not retried on its own: a later connection leaves the error in place.
        channel.emit_connected();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(control.snapshot().state, ScanState::Error);
        assert!(channel.subscriptions().is_empty());
        control.shutdown();
    };
    tokio::join!(h.session.run(), script);
}

#[tokio::test(start_paused = true)]
async fn test_channel_giving_up_is_error() {
    let mut h = harness();
    let (channel, control) = (h.channel.clone(), h.control.clone());

    let script = async {
        wait(&control, |s| s.state == ScanState::Ready).await;
        channel.emit_disconnected("broker gone");
        channel.emit(checador_network::ChannelEvent::GaveUp { attempts: 3 });

        let snapshot = wait(&control, |s| s.state == ScanState::Error).await;
        assert_eq!(
            snapshot.last_error,
            Some(SessionError::ChannelGaveUp { attempts: 3 })
        );
        control.shutdown();
    };
    tokio::join!(h.session.run(), script);

    assert_eq!(count_teardown_calls(&h), (1, 1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_stale_and_late_scans_are_ignored() {
    let mut h = harness();
    let (channel, control) = (h.channel.clone(), h.control.clone());

    let script = async {
        wait(&control, |s| s.state == ScanState::Ready).await;
        let stale = channel.subscriptions()[0].clone();

        channel.emit_disconnected("blip");
        channel.emit_connected();
        wait(&control, |s| s.channel_connected).await;

        channel.emit(checador_network::ChannelEvent::Scan {
            handle: stale,
            event: ScanEvent::identified(reader(), ana(), Utc::now()),
        });
        sleep(Duration::from_millis(100)).await;
        assert_eq!(control.snapshot().state, ScanState::Ready);
        control.shutdown();
    };
    tokio::join!(h.session.run(), script);

    // After teardown nothing reaches the machine.
    assert!(!h.channel.emit_scan(ScanEvent::identified(reader(), ana(), Utc::now())));
    assert_eq!(h.session.machine().current_state(), ScanState::Idle);
}

async fn teardown_from(state: ScanState) -> (usize, usize, usize) {
    let mut h = harness();
    let (channel, control) = (h.channel.clone(), h.control.clone());

    let script = async {
        wait(&control, |s| s.state == ScanState::Ready).await;
        match state {
            ScanState::Success => {
                channel.emit_scan(ScanEvent::identified(reader(), ana(), Utc::now()));
            }
            ScanState::Failed => {
                channel.emit_scan(ScanEvent::unidentified(reader(), Utc::now()));
            }
            ScanState::Error => {
                channel.emit(checador_network::ChannelEvent::GaveUp { attempts: 1 });
            }
            _ => {}
        }
        wait(&control, |s| s.state == state).await;
        control.shutdown();
    };
    tokio::join!(h.session.run(), script);

    count_teardown_calls(&h)
}

#[tokio::test(start_paused = true)]
async fn test_teardown_issues_each_call_once() {
    for state in [
        ScanState::Ready,
        ScanState::Success,
        ScanState::Failed,
        ScanState::Error,
    ] {
        assert_eq!(teardown_from(state).await, (1, 1, 1), "from {state}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_teardown_after_rejected_reserve_has_nothing_to_unsubscribe() {
    let mut h = harness();
    let other = SessionId::new("kiosk-b").unwrap();
    h.registry.reserve(&reader(), &other).await.unwrap();
    let control = h.control.clone();

    let script = async {
        wait(&control, |s| s.state == ScanState::Error).await;
        control.shutdown();
    };
    tokio::join!(h.session.run(), script);

    // Stop and release are still sent once; no subscription was ever made.
    assert_eq!(count_teardown_calls(&h), (1, 0, 1));
    assert_eq!(h.registry.holder(&reader()), Some(other));
    assert!(h.control.snapshot().torn_down);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_continues_past_failures() {
    let mut h = harness();
    h.registry.fail_next_stop("service crashed");
    h.registry.fail_next_release("registry hiccup");
    let (channel, control) = (h.channel.clone(), h.control.clone());

    let script = async {
        wait(&control, |s| s.state == ScanState::Ready).await;
        control.shutdown();
    };
    tokio::join!(h.session.run(), script);

    assert_eq!(count_teardown_calls(&h), (1, 1, 1));
    assert_eq!(channel.calls().last(), Some(&ChannelCall::Disconnect));
    assert!(h.control.snapshot().torn_down);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_control_shuts_down() {
    let mut h = harness();
    let registry = h.registry.clone();
    let control = h.control;

    let script = async move {
        wait(&control, |s| s.state == ScanState::Ready).await;
        drop(control);
    };
    tokio::join!(h.session.run(), script);

    assert!(registry.holder(&reader()).is_none());
}

/// Registry whose every call takes a while.
#[derive(Clone)]
struct SlowRegistry {
    inner: InMemoryRegistry,
    delay: Duration,
}

impl ReaderRegistry for SlowRegistry {
    async fn reserve(&self, reader: &ReaderId, session: &SessionId) -> Result<(), ReservationError> {
        sleep(self.delay).await;
        self.inner.reserve(reader, session).await
    }

    async fn start_scanning(
        &self,
        reader: &ReaderId,
        session: &SessionId,
    ) -> Result<(), ScanServiceError> {
        sleep(self.delay).await;
        self.inner.start_scanning(reader, session).await
    }

    async fn stop_scanning(&self, reader: &ReaderId) -> Result<(), ScanServiceError> {
        sleep(self.delay).await;
        self.inner.stop_scanning(reader).await
    }

    async fn release(&self, reader: &ReaderId, session: &SessionId) -> Result<(), ReservationError> {
        sleep(self.delay).await;
        self.inner.release(reader, session).await
    }

    async fn force_release(&self, reader: &ReaderId) -> Result<(), ReservationError> {
        self.inner.force_release(reader).await
    }

    async fn list_reserved(&self) -> Result<Vec<ReservationListEntry>, ReservationError> {
        self.inner.list_reserved().await
    }

    async fn available_readers(&self) -> Result<Vec<ReaderId>, ReservationError> {
        self.inner.available_readers().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_reserve_discards_result() {
    let registry = InMemoryRegistry::with_readers([reader()]);
    let slow = SlowRegistry {
        inner: registry.clone(),
        delay: Duration::from_secs(3),
    };
    let mut h = harness_with(registry, slow, FakeChannel::new(), false);
    let (registry, channel, control) = (h.registry.clone(), h.channel.clone(), h.control.clone());

    let script = async {
        let snapshot = wait(&control, |s| s.pending == Some(PendingRequest::Reserving)).await;
        assert_eq!(snapshot.state, ScanState::Idle);

        sleep(Duration::from_secs(1)).await;
        control.shutdown();
    };
    tokio::join!(h.session.run(), script);

    assert_eq!(channel.count_calls(|c| matches!(c, ChannelCall::Connect)), 0);
    assert_eq!(
        registry.count_calls(|c| matches!(c, RegistryCall::Reserve(..))),
        0
    );
    assert_eq!(count_teardown_calls(&h), (1, 0, 1));
    assert!(h.session.machine().is_torn_down());
    assert!(!h.session.machine().readiness().reserved);
}

#[tokio::test(start_paused = true)]
async fn test_pending_start_is_visible() {
    let registry = InMemoryRegistry::with_readers([reader()]);
    let slow = SlowRegistry {
        inner: registry.clone(),
        delay: Duration::from_millis(500),
    };
    let mut h = harness_with(registry, slow, FakeChannel::new(), false);
    let control = h.control.clone();

    let script = async {
        wait(&control, |s| s.pending == Some(PendingRequest::Starting)).await;
        let snapshot = wait(&control, |s| s.state == ScanState::Ready).await;
        assert_eq!(snapshot.pending, None);
        control.shutdown();
    };
    tokio::join!(h.session.run(), script);
}
