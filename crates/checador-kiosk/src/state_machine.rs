//! Scan state machine for one reader session.
//!
//! The machine is a plain input/output contract: the session driver feeds it
//! registry results, channel events, scan events and timer expirations, and
//! reads back exactly one current [`ScanState`]. It performs no I/O; every
//! input takes the current instant as an argument.
//!
//! # States
//!
//! - `Idle`: reader not yet reserved, started, connected and subscribed
//! - `Ready`: waiting for a finger
//! - `Success`: a recognized scan is being shown
//! - `Failed`: an unrecognized scan is being shown
//! - `Error`: setup failed; carries the cause
//!
//! # Valid Transitions
//!
//! - Idle → Ready once all four readiness flags are set, in any order
//! - Ready/Success/Failed → Success/Failed on a scan (the settle timer restarts)
//! - Success/Failed → Ready when the settle deadline passes
//! - Idle/Ready/Success/Failed → Error on a failure
//! - Error → Idle only through [`ScanMachine::reinitialize`]
//!
//! # Examples
//!
//! ```
//! use checador_core::{ReaderId, ScanEvent, Subject};
//! use checador_kiosk::{ScanMachine, ScanState};
//! use chrono::Utc;
//! use tokio::time::{Duration, Instant};
//!
//! let reader = ReaderId::new("LECTOR-01").unwrap();
//! let mut machine = ScanMachine::new(reader.clone());
//! let now = Instant::now();
//!
//! machine.reservation_confirmed(now);
//! machine.channel_connected(now);
//! machine.subscribed(now);
//! machine.scanning_started(now);
//! assert_eq!(machine.current_state(), ScanState::Ready);
//!
//! let event = ScanEvent::identified(reader, Subject::new("7", "Ana Ruiz"), Utc::now());
//! machine.handle_scan(&event, now);
//! assert_eq!(machine.current_state(), ScanState::Success);
//!
//! machine.settle(now + Duration::from_secs(5));
//! assert_eq!(machine.current_state(), ScanState::Ready);
//! assert!(machine.last_subject().is_none());
//! ```

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use checador_core::constants::{
    MSG_INITIALIZING, MSG_NOT_RECOGNIZED, MSG_READY, MSG_RECOGNIZED, RECENT_SCANS_CAPACITY,
};
use checador_core::{
    ActionClassifier, AttendanceAction, ReaderId, ScanEvent, Subject, TimeOfDayClassifier,
};

use crate::config::SettleConfig;
use crate::error::{MachineError, SessionError};

/// Maximum number of state transitions to keep in history.
///
/// A scan cycle is two transitions (Ready → Success → Ready), so this keeps
/// the last fifty scans plus setup for diagnostics.
const MAX_HISTORY_SIZE: usize = 100;

/// Phase of a kiosk reader session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    /// Setup in progress.
    Idle,

    /// Reader reserved, scanning, and subscribed; waiting for a finger.
    Ready,

    /// Showing a recognized scan until the settle deadline.
    Success,

    /// Showing an unrecognized scan until the settle deadline.
    Failed,

    /// Setup failed. Left only by explicit reinitialization.
    Error,
}

impl ScanState {
    /// Returns `true` for the states that end with a settle deadline.
    pub fn is_settling(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Returns `true` if a scan event is acted upon in this state.
    pub fn accepts_scans(self) -> bool {
        matches!(self, Self::Ready | Self::Success | Self::Failed)
    }

    /// Checks whether moving from `self` to `next` is allowed.
    ///
    /// Settling states may re-enter either settling state, since a new scan
    /// replaces the one on display.
    pub fn can_transition_to(self, next: ScanState) -> bool {
        use ScanState::*;

        matches!(
            (self, next),
            (Idle, Ready)
                | (Idle, Error)
                | (Ready, Success)
                | (Ready, Failed)
                | (Ready, Error)
                | (Success, Success)
                | (Success, Failed)
                | (Success, Ready)
                | (Success, Error)
                | (Failed, Success)
                | (Failed, Failed)
                | (Failed, Ready)
                | (Failed, Error)
                | (Error, Idle)
        )
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            ScanState::Idle => "Idle",
            ScanState::Ready => "Ready",
            ScanState::Success => "Success",
            ScanState::Failed => "Failed",
            ScanState::Error => "Error",
        };
        write!(f, "{state_str}")
    }
}

/// Registry request the session is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingRequest {
    Reserving,
    Starting,
}

/// Independent preconditions for leaving `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub reserved: bool,
    pub scanning: bool,
    pub connected: bool,
    pub subscribed: bool,
}

impl Readiness {
    pub fn is_complete(&self) -> bool {
        self.reserved && self.scanning && self.connected && self.subscribed
    }
}

/// A recorded state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: ScanState,
    pub to: ScanState,
    pub timestamp: Instant,
}

impl StateTransition {
    pub fn new(from: ScanState, to: ScanState, timestamp: Instant) -> Self {
        Self {
            from,
            to,
            timestamp,
        }
    }

    /// Time elapsed since this transition, measured at `now`.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.timestamp)
    }
}

/// A recognized scan kept in the recent list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentScan {
    pub subject: Subject,
    pub action: AttendanceAction,
    pub at: DateTime<Utc>,
}

/// What the machine made of a scan event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Recognized {
        subject: Subject,
        action: AttendanceAction,
        settle: Duration,
    },
    NotRecognized {
        settle: Duration,
    },
}

impl ScanOutcome {
    pub fn settle(&self) -> Duration {
        match self {
            ScanOutcome::Recognized { settle, .. } | ScanOutcome::NotRecognized { settle } => {
                *settle
            }
        }
    }
}

/// Read-only view of a session, published after every input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub reader: ReaderId,
    pub state: ScanState,
    pub channel_connected: bool,
    pub pending: Option<PendingRequest>,
    pub last_error: Option<SessionError>,
    pub last_subject: Option<Subject>,
    pub last_action: Option<AttendanceAction>,
    pub quick_mode: bool,
    pub recent_scans: Vec<RecentScan>,
    pub torn_down: bool,
}

impl SessionSnapshot {
    /// Operator-facing status line.
    pub fn status_message(&self) -> String {
        match self.state {
            ScanState::Idle => MSG_INITIALIZING.to_string(),
            ScanState::Ready => MSG_READY.to_string(),
            ScanState::Success => match (&self.last_subject, self.last_action) {
                (Some(subject), Some(action)) => format!("{action}: {}", subject.name),
                _ => MSG_RECOGNIZED.to_string(),
            },
            ScanState::Failed => MSG_NOT_RECOGNIZED.to_string(),
            ScanState::Error => self
                .last_error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| MSG_INITIALIZING.to_string()),
        }
    }
}

/// Scan state machine for one (reader, session) pair.
pub struct ScanMachine {
    reader: ReaderId,
    current_state: ScanState,
    state_entered_at: Instant,
    readiness: Readiness,
    pending: Option<PendingRequest>,
    last_error: Option<SessionError>,
    last_subject: Option<Subject>,
    last_action: Option<AttendanceAction>,
    quick_mode: bool,
    settle: SettleConfig,
    settle_deadline: Option<Instant>,
    recent_scans: VecDeque<RecentScan>,
    history: VecDeque<StateTransition>,
    classifier: Box<dyn ActionClassifier>,
    been_ready: bool,
    torn_down: bool,
}

impl fmt::Debug for ScanMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanMachine")
            .field("reader", &self.reader)
            .field("current_state", &self.current_state)
            .field("readiness", &self.readiness)
            .field("pending", &self.pending)
            .field("last_error", &self.last_error)
            .field("quick_mode", &self.quick_mode)
            .field("settle_deadline", &self.settle_deadline)
            .field("torn_down", &self.torn_down)
            .finish_non_exhaustive()
    }
}

impl ScanMachine {
    /// Creates a machine in `Idle` with default settle delays and the
    /// time-of-day classifier.
    pub fn new(reader: ReaderId) -> Self {
        Self::builder(reader).build()
    }

    pub fn builder(reader: ReaderId) -> ScanMachineBuilder {
        ScanMachineBuilder::new(reader)
    }

    pub fn reader(&self) -> &ReaderId {
        &self.reader
    }

    pub fn current_state(&self) -> ScanState {
        self.current_state
    }

    pub fn time_in_current_state(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.state_entered_at)
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn pending(&self) -> Option<PendingRequest> {
        self.pending
    }

    pub fn is_channel_connected(&self) -> bool {
        self.readiness.connected
    }

    /// Cause of the current `Error` state.
    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    /// Subject on display, if any.
    pub fn last_subject(&self) -> Option<&Subject> {
        self.last_subject.as_ref()
    }

    pub fn last_action(&self) -> Option<AttendanceAction> {
        self.last_action
    }

    pub fn quick_mode(&self) -> bool {
        self.quick_mode
    }

    /// Switch quick mode. Takes effect from the next scan.
    pub fn set_quick_mode(&mut self, quick_mode: bool) {
        if self.quick_mode != quick_mode {
            debug!(reader = %self.reader, quick_mode, "Quick mode changed");
        }
        self.quick_mode = quick_mode;
    }

    pub fn settle_config(&self) -> &SettleConfig {
        &self.settle
    }

    /// When the scan on display returns to `Ready`.
    pub fn settle_deadline(&self) -> Option<Instant> {
        self.settle_deadline
    }

    /// Recognized scans, newest first.
    pub fn recent_scans(&self) -> impl Iterator<Item = &RecentScan> {
        self.recent_scans.iter()
    }

    pub fn history(&self) -> &VecDeque<StateTransition> {
        &self.history
    }

    /// Returns up to `count` most recent transitions, oldest first.
    pub fn last_transitions(&self, count: usize) -> Vec<StateTransition> {
        let skip = self.history.len().saturating_sub(count);
        self.history.iter().skip(skip).copied().collect()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Marks a registry request as in flight.
    pub fn begin_request(&mut self, request: PendingRequest) {
        if !self.torn_down {
            self.pending = Some(request);
        }
    }

    pub fn reservation_confirmed(&mut self, now: Instant) -> Option<StateTransition> {
        self.clear_pending(PendingRequest::Reserving);
        self.update_readiness(now, |r| r.reserved = true)
    }

    /// The reservation was given up (compensating release after a failed
    /// start).
    pub fn reservation_released(&mut self) {
        self.readiness.reserved = false;
        self.readiness.scanning = false;
    }

    pub fn scanning_started(&mut self, now: Instant) -> Option<StateTransition> {
        self.clear_pending(PendingRequest::Starting);
        self.update_readiness(now, |r| r.scanning = true)
    }

    pub fn channel_connected(&mut self, now: Instant) -> Option<StateTransition> {
        self.update_readiness(now, |r| r.connected = true)
    }

    pub fn subscribed(&mut self, now: Instant) -> Option<StateTransition> {
        self.update_readiness(now, |r| r.subscribed = true)
    }

    /// The channel connection dropped.
    ///
    /// Before the session was ever ready this is a setup failure. Afterwards
    /// it only clears the connection flags; the channel reconnects on its own
    /// and the driver resubscribes.
    pub fn channel_lost(&mut self, reason: &str, now: Instant) -> Option<StateTransition> {
        if self.torn_down {
            return None;
        }
        self.readiness.connected = false;
        self.readiness.subscribed = false;

        if self.fails_setup() {
            return self.fail(SessionError::channel(reason), now);
        }
        info!(reader = %self.reader, reason, "Event channel lost, waiting for reconnect");
        None
    }

    /// The channel reported an error.
    pub fn channel_error(&mut self, message: &str, now: Instant) -> Option<StateTransition> {
        if self.torn_down {
            return None;
        }
        if self.fails_setup() {
            return self.fail(SessionError::channel(message), now);
        }
        warn!(reader = %self.reader, message, "Event channel error after setup");
        None
    }

    /// Subscribing to the reader topic failed.
    ///
    /// After setup the channel is also marked offline: no scans arrive until
    /// the next reconnect, when the driver subscribes again.
    pub fn subscription_failed(&mut self, message: &str, now: Instant) -> Option<StateTransition> {
        if self.torn_down {
            return None;
        }
        self.readiness.subscribed = false;

        if self.fails_setup() {
            return self.fail(SessionError::subscription(message), now);
        }
        self.readiness.connected = false;
        warn!(reader = %self.reader, message, "Resubscribe failed, waiting for next reconnect");
        None
    }

    fn fails_setup(&self) -> bool {
        !self.been_ready && self.current_state == ScanState::Idle
    }

    /// Enter `Error` with `error` as the cause.
    ///
    /// A machine already in `Error` keeps its first cause.
    pub fn fail(&mut self, error: SessionError, now: Instant) -> Option<StateTransition> {
        if self.torn_down {
            debug!(reader = %self.reader, %error, "Ignoring failure after teardown");
            return None;
        }
        self.pending = None;

        if self.current_state == ScanState::Error {
            debug!(reader = %self.reader, %error, "Already in error state");
            return None;
        }

        warn!(reader = %self.reader, %error, "Session entering error state");
        self.settle_deadline = None;
        self.last_subject = None;
        self.last_action = None;
        self.last_error = Some(error);
        self.transition_to(ScanState::Error, now).ok()
    }

    /// Process one scan event.
    ///
    /// Returns `None` when the event is ignored: outside `Ready`, `Success`
    /// and `Failed`, after teardown, or for another reader. Otherwise the
    /// settle deadline is (re)started from `now`.
    pub fn handle_scan(&mut self, event: &ScanEvent, now: Instant) -> Option<ScanOutcome> {
        if self.torn_down || !self.current_state.accepts_scans() {
            debug!(
                reader = %self.reader,
                state = %self.current_state,
                torn_down = self.torn_down,
                "Ignoring scan event"
            );
            return None;
        }
        if event.reader_id != self.reader {
            warn!(
                reader = %self.reader,
                event_reader = %event.reader_id,
                "Ignoring scan event for another reader"
            );
            return None;
        }

        let settle = self.settle.delay_for(event.identified, self.quick_mode);
        let outcome = match event.subject() {
            Some(subject) => {
                let at: DateTime<Local> = event.timestamp.with_timezone(&Local);
                let action = self.classifier.classify(event, at);
                info!(
                    reader = %self.reader,
                    subject_id = %subject.id,
                    %action,
                    "Fingerprint recognized"
                );

                self.recent_scans.push_front(RecentScan {
                    subject: subject.clone(),
                    action,
                    at: event.timestamp,
                });
                self.recent_scans.truncate(RECENT_SCANS_CAPACITY);

                if self.quick_mode {
                    self.last_subject = None;
                    self.last_action = None;
                } else {
                    self.last_subject = Some(subject.clone());
                    self.last_action = Some(action);
                }
                ScanOutcome::Recognized {
                    subject,
                    action,
                    settle,
                }
            }
            None => {
                info!(reader = %self.reader, "Fingerprint not recognized");
                self.last_subject = None;
                self.last_action = None;
                ScanOutcome::NotRecognized { settle }
            }
        };

        let next = match outcome {
            ScanOutcome::Recognized { .. } => ScanState::Success,
            ScanOutcome::NotRecognized { .. } => ScanState::Failed,
        };
        if self.transition_to(next, now).is_err() {
            return None;
        }
        self.settle_deadline = Some(now + settle);
        Some(outcome)
    }

    /// Return to `Ready` if the settle deadline has passed by `now`.
    pub fn settle(&mut self, now: Instant) -> Option<StateTransition> {
        let deadline = self.settle_deadline?;
        if now < deadline {
            return None;
        }

        self.settle_deadline = None;
        if !self.current_state.is_settling() {
            return None;
        }
        self.last_subject = None;
        self.last_action = None;
        self.transition_to(ScanState::Ready, now).ok()
    }

    /// Leave `Error` for `Idle` so setup can run again.
    ///
    /// Reservation and scanning flags are kept so the driver only repeats
    /// the steps that did not complete; the subscription is always redone.
    ///
    /// # Errors
    /// Returns [`MachineError::InvalidTransition`] outside `Error` and
    /// [`MachineError::TornDown`] after teardown.
    pub fn reinitialize(&mut self, now: Instant) -> Result<StateTransition, MachineError> {
        if self.torn_down {
            return Err(MachineError::TornDown);
        }
        let transition = self.transition_to(ScanState::Idle, now)?;

        info!(reader = %self.reader, "Reinitializing session");
        self.last_error = None;
        self.pending = None;
        self.readiness.subscribed = false;
        self.been_ready = false;
        Ok(transition)
    }

    /// Stop reacting to inputs and return to `Idle`.
    ///
    /// Returns `false` if the machine was already torn down.
    pub fn tear_down(&mut self, now: Instant) -> bool {
        if self.torn_down {
            return false;
        }

        self.torn_down = true;
        self.pending = None;
        self.settle_deadline = None;
        self.last_subject = None;
        self.last_action = None;
        self.readiness = Readiness::default();

        if self.current_state != ScanState::Idle {
            let transition = StateTransition::new(self.current_state, ScanState::Idle, now);
            self.perform_state_change(transition);
        }
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            reader: self.reader.clone(),
            state: self.current_state,
            channel_connected: self.readiness.connected,
            pending: self.pending,
            last_error: self.last_error.clone(),
            last_subject: self.last_subject.clone(),
            last_action: self.last_action,
            quick_mode: self.quick_mode,
            recent_scans: self.recent_scans.iter().cloned().collect(),
            torn_down: self.torn_down,
        }
    }

    fn clear_pending(&mut self, request: PendingRequest) {
        if self.pending == Some(request) {
            self.pending = None;
        }
    }

    fn update_readiness(
        &mut self,
        now: Instant,
        update: impl FnOnce(&mut Readiness),
    ) -> Option<StateTransition> {
        if self.torn_down {
            return None;
        }
        update(&mut self.readiness);

        if self.current_state == ScanState::Idle && self.readiness.is_complete() {
            let transition = self.transition_to(ScanState::Ready, now).ok()?;
            info!(reader = %self.reader, "Reader ready");
            self.been_ready = true;
            return Some(transition);
        }
        None
    }

    fn transition_to(
        &mut self,
        next: ScanState,
        now: Instant,
    ) -> Result<StateTransition, MachineError> {
        if !self.current_state.can_transition_to(next) {
            warn!(
                reader = %self.reader,
                from = %self.current_state,
                to = %next,
                "Rejected state transition"
            );
            return Err(MachineError::InvalidTransition {
                from: self.current_state,
                to: next,
            });
        }

        let transition = StateTransition::new(self.current_state, next, now);
        self.perform_state_change(transition);
        Ok(transition)
    }

    fn perform_state_change(&mut self, transition: StateTransition) {
        debug!(
            reader = %self.reader,
            from = %transition.from,
            to = %transition.to,
            "State transition"
        );
        self.current_state = transition.to;
        self.state_entered_at = transition.timestamp;
        self.add_to_history(transition);
    }

    fn add_to_history(&mut self, transition: StateTransition) {
        if self.history.len() >= MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(transition);
    }
}

/// Builder for [`ScanMachine`].
///
/// # Example
///
/// ```
/// use checador_core::{AttendanceAction, ReaderId, ScanEvent};
/// use checador_kiosk::{ScanMachine, SettleConfig};
/// use chrono::{DateTime, Local};
/// use std::time::Duration;
///
/// let machine = ScanMachine::builder(ReaderId::new("LECTOR-01").unwrap())
///     .with_settle(SettleConfig::default().success(Duration::from_secs(3)))
///     .with_classifier(|_: &ScanEvent, _: DateTime<Local>| AttendanceAction::Entry)
///     .with_quick_mode(true)
///     .build();
///
/// assert!(machine.quick_mode());
/// ```
pub struct ScanMachineBuilder {
    reader: ReaderId,
    settle: SettleConfig,
    classifier: Box<dyn ActionClassifier>,
    quick_mode: bool,
}

impl ScanMachineBuilder {
    pub fn new(reader: ReaderId) -> Self {
        Self {
            reader,
            settle: SettleConfig::default(),
            classifier: Box::new(TimeOfDayClassifier::default()),
            quick_mode: false,
        }
    }

    pub fn with_settle(mut self, settle: SettleConfig) -> Self {
        self.settle = settle;
        self
    }

    /// Replace the entry/exit classifier.
    pub fn with_classifier(mut self, classifier: impl ActionClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn with_quick_mode(mut self, quick_mode: bool) -> Self {
        self.quick_mode = quick_mode;
        self
    }

    pub fn build(self) -> ScanMachine {
        ScanMachine {
            reader: self.reader,
            current_state: ScanState::Idle,
            state_entered_at: Instant::now(),
            readiness: Readiness::default(),
            pending: None,
            last_error: None,
            last_subject: None,
            last_action: None,
            quick_mode: self.quick_mode,
            settle: self.settle,
            settle_deadline: None,
            recent_scans: VecDeque::with_capacity(RECENT_SCANS_CAPACITY),
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
            classifier: self.classifier,
            been_ready: false,
            torn_down: false,
        }
    }
}
