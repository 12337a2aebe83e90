//! Session driver: one kiosk reader session on one logical task.
//!
//! [`KioskSession`] owns the reservation client, the event channel and the
//! [`ScanMachine`]. Its run loop interleaves channel events, the settle
//! timer and operator commands, feeding each into the machine in arrival
//! order and publishing a [`SessionSnapshot`] after every input.
//!
//! # Lifecycle
//!
//! ```text
//! reserve ──> connect channel ──> (Connected) subscribe ──> start scanning ──> Ready
//!                                     ▲                                          │
//!                                     └────────── resubscribe on reconnect ◄─────┘
//!
//! shutdown: stop scanning ──> unsubscribe ──> release ──> disconnect
//! ```
//!
//! Registry requests are awaited inline, so no channel event or timer is
//! processed while one is in flight; a shutdown command still interrupts
//! the wait and the request's result is discarded.

use std::future::Future;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use checador_core::ReaderId;
use checador_network::{
    ChannelEvent, ChannelEvents, EventChannel, ReaderRegistry, ReservationClient,
    SubscriptionHandle,
};

use crate::error::SessionError;
use crate::state_machine::{PendingRequest, ScanMachine, ScanState, SessionSnapshot};

/// Operator command sent to a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Leave the error state and run setup again.
    Reinitialize,

    SetQuickMode(bool),

    /// Tear the session down and return from `run`.
    Shutdown,
}

/// Handle for steering and observing a [`KioskSession`] from elsewhere.
///
/// Dropping every clone of the handle shuts the session down.
#[derive(Debug, Clone)]
pub struct SessionControl {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionControl {
    /// Returns `false` if the session has already finished.
    pub fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn reinitialize(&self) -> bool {
        self.send(SessionCommand::Reinitialize)
    }

    pub fn set_quick_mode(&self, quick_mode: bool) -> bool {
        self.send(SessionCommand::SetQuickMode(quick_mode))
    }

    pub fn shutdown(&self) -> bool {
        self.send(SessionCommand::Shutdown)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every published snapshot.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    ///
    /// Returns `None` if the session is dropped first.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Option<SessionSnapshot> {
        let mut rx = self.snapshots.clone();
        let snapshot = rx.wait_for(predicate).await.ok()?;
        Some(snapshot.clone())
    }
}

/// One reader session of a kiosk.
///
/// # Example
///
/// ```
/// use checador_core::{ReaderId, SessionId};
/// use checador_kiosk::{KioskSession, ScanMachine, ScanState};
/// use checador_network::{FakeChannel, InMemoryRegistry, ReservationClient};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let reader = ReaderId::new("LECTOR-01").unwrap();
/// let registry = InMemoryRegistry::with_readers([reader.clone()]);
/// let (channel, events) = FakeChannel::new();
/// let client = ReservationClient::new(registry.clone(), SessionId::generate());
///
/// let (mut session, control) =
///     KioskSession::new(client, channel, events, ScanMachine::new(reader.clone()));
///
/// let script = async {
///     control.wait_for(|s| s.state == ScanState::Ready).await;
///     control.shutdown();
/// };
/// tokio::join!(session.run(), script);
///
/// assert!(registry.holder(&reader).is_none());
/// # }
/// ```
pub struct KioskSession<R, C> {
    reader: ReaderId,
    client: ReservationClient<R>,
    channel: C,
    events: ChannelEvents,
    events_open: bool,
    machine: ScanMachine,
    subscription: Option<SubscriptionHandle>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl<R, C> KioskSession<R, C>
where
    R: ReaderRegistry,
    C: EventChannel,
{
    /// Bind a client, a channel and its events, and a fresh machine into a
    /// session. Nothing happens until [`run`](Self::run).
    pub fn new(
        client: ReservationClient<R>,
        channel: C,
        events: ChannelEvents,
        machine: ScanMachine,
    ) -> (Self, SessionControl) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());

        let session = Self {
            reader: machine.reader().clone(),
            client,
            channel,
            events,
            events_open: true,
            machine,
            subscription: None,
            commands: command_rx,
            snapshots: snapshot_tx,
        };
        let control = SessionControl {
            commands: command_tx,
            snapshots: snapshot_rx,
        };
        (session, control)
    }

    pub fn reader(&self) -> &ReaderId {
        &self.reader
    }

    pub fn machine(&self) -> &ScanMachine {
        &self.machine
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Run setup and the event loop until shut down, then tear down.
    ///
    /// Returns immediately if the session was already torn down.
    pub async fn run(&mut self) {
        if self.machine.is_torn_down() {
            return;
        }
        info!(
            reader = %self.reader,
            session = %self.client.session(),
            "Starting kiosk session"
        );

        let mut stopping = !self.setup().await;

        while !stopping {
            tokio::select! {
                command = self.commands.recv() => {
                    stopping = !self.on_command(command).await;
                }
                event = self.events.recv(), if self.events_open => match event {
                    Some(event) => stopping = !self.on_channel_event(event).await,
                    None => {
                        warn!(reader = %self.reader, "Event channel dropped its event stream");
                        self.events_open = false;
                    }
                },
                () = settle_at(self.machine.settle_deadline()) => {
                    if self.machine.settle(Instant::now()).is_some() {
                        self.publish();
                    }
                }
            }
        }

        self.teardown().await;
    }

    /// Returns `false` when the session must stop.
    async fn on_command(&mut self, command: Option<SessionCommand>) -> bool {
        match command {
            Some(SessionCommand::SetQuickMode(quick_mode)) => {
                self.machine.set_quick_mode(quick_mode);
                self.publish();
                true
            }
            Some(SessionCommand::Reinitialize) => {
                let was_subscribed = self.machine.readiness().subscribed;
                match self.machine.reinitialize(Instant::now()) {
                    Ok(_) => {
                        if was_subscribed {
                            self.drop_subscription();
                        }
                        self.publish();
                        self.setup().await
                    }
                    Err(e) => {
                        warn!(reader = %self.reader, error = %e, "Reinitialize ignored");
                        true
                    }
                }
            }
            Some(SessionCommand::Shutdown) => {
                debug!(reader = %self.reader, "Shutdown requested");
                false
            }
            None => {
                debug!(reader = %self.reader, "Session control dropped");
                false
            }
        }
    }

    /// Reserve (unless already held) and open the channel.
    ///
    /// Returns `false` if shutdown arrived while a request was in flight.
    async fn setup(&mut self) -> bool {
        if !self.machine.readiness().reserved {
            self.machine.begin_request(PendingRequest::Reserving);
            self.publish();

            let call = self.client.reserve(&self.reader);
            let Some(result) = interruptible(call, &mut self.commands, &mut self.machine).await
            else {
                return false;
            };

            match result {
                Ok(()) => {
                    info!(reader = %self.reader, "Reader reserved");
                    self.machine.reservation_confirmed(Instant::now());
                }
                Err(e) => {
                    error!(reader = %self.reader, error = %e, "Reservation failed");
                    self.machine.fail(e.into(), Instant::now());
                    self.publish();
                    return true;
                }
            }
        }

        self.channel.connect();
        if self.channel.is_connected() {
            self.machine.channel_connected(Instant::now());
            return self.subscribe().await;
        }

        self.publish();
        true
    }

    /// Subscribe to the reader topic, then start scanning if not yet started.
    async fn subscribe(&mut self) -> bool {
        match self.channel.subscribe(&self.reader) {
            Ok(handle) => {
                debug!(reader = %self.reader, subscription = %handle, "Subscribed to reader topic");
                self.subscription = Some(handle);
                self.machine.subscribed(Instant::now());
                self.publish();

                if !self.machine.readiness().scanning {
                    return self.start_scanning().await;
                }
                true
            }
            Err(e) => {
                self.machine.subscription_failed(&e.to_string(), Instant::now());
                self.publish();
                true
            }
        }
    }

    async fn start_scanning(&mut self) -> bool {
        self.machine.begin_request(PendingRequest::Starting);
        self.publish();

        let call = self.client.start_scanning(&self.reader);
        let Some(result) = interruptible(call, &mut self.commands, &mut self.machine).await else {
            return false;
        };

        match result {
            Ok(()) => {
                info!(reader = %self.reader, "Scan service started");
                self.machine.scanning_started(Instant::now());
            }
            Err(e) => {
                error!(reader = %self.reader, error = %e, "Scan service failed to start");
                self.machine.reservation_released();
                self.machine.fail(e.into(), Instant::now());
            }
        }
        self.publish();
        true
    }

    async fn on_channel_event(&mut self, event: ChannelEvent) -> bool {
        let now = Instant::now();

        match event {
            ChannelEvent::Connected => {
                self.machine.channel_connected(now);
                let resubscribe = self.machine.current_state() != ScanState::Error
                    && !self.machine.is_torn_down()
                    && !self.machine.readiness().subscribed;
                if resubscribe {
                    return self.subscribe().await;
                }
            }
            ChannelEvent::Disconnected { reason } => {
                self.machine.channel_lost(&reason, now);
            }
            ChannelEvent::Error { message } => {
                self.machine.channel_error(&message, now);
            }
            ChannelEvent::GaveUp { attempts } => {
                self.machine
                    .fail(SessionError::ChannelGaveUp { attempts }, now);
            }
            ChannelEvent::Scan { handle, event } => {
                if self.subscription.as_ref() != Some(&handle) {
                    debug!(
                        reader = %self.reader,
                        subscription = %handle,
                        "Ignoring scan from stale subscription"
                    );
                    return true;
                }
                self.machine.handle_scan(&event, now);
            }
        }

        self.publish();
        true
    }

    /// Stop scanning, unsubscribe, release, disconnect. Each step runs once
    /// regardless of the others' outcome.
    async fn teardown(&mut self) {
        if !self.machine.tear_down(Instant::now()) {
            return;
        }
        self.publish();
        info!(reader = %self.reader, "Tearing down kiosk session");

        if let Err(e) = self.client.stop_scanning(&self.reader).await {
            warn!(reader = %self.reader, error = %e, "Failed to stop scanning during teardown");
        }

        if let Some(handle) = self.subscription.take()
            && let Err(e) = self.channel.unsubscribe(&handle)
        {
            warn!(reader = %self.reader, error = %e, "Failed to unsubscribe during teardown");
        }

        if let Err(e) = self.client.release(&self.reader).await {
            warn!(reader = %self.reader, error = %e, "Failed to release reader during teardown");
        }

        self.channel.disconnect();
        info!(reader = %self.reader, "Kiosk session closed");
    }

    /// Unsubscribe a handle that is still live on the current connection.
    fn drop_subscription(&mut self) {
        if let Some(handle) = self.subscription.take()
            && let Err(e) = self.channel.unsubscribe(&handle)
        {
            warn!(reader = %self.reader, error = %e, "Failed to drop previous subscription");
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.machine.snapshot());
    }
}

/// Await `call` while still honouring operator commands.
///
/// Returns `None` if shutdown was requested first; the call is dropped and
/// its result never reaches the machine.
async fn interruptible<F: Future>(
    call: F,
    commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    machine: &mut ScanMachine,
) -> Option<F::Output> {
    tokio::pin!(call);

    loop {
        tokio::select! {
            output = &mut call => return Some(output),
            command = commands.recv() => match command {
                Some(SessionCommand::SetQuickMode(quick_mode)) => machine.set_quick_mode(quick_mode),
                Some(SessionCommand::Reinitialize) => {
                    debug!("Reinitialize ignored while a request is in flight");
                }
                Some(SessionCommand::Shutdown) | None => return None,
            },
        }
    }
}

async fn settle_at(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
