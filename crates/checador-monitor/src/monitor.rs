//! Reservation monitor.
//!
//! Lets an administrator watch which readers are reserved and break stuck
//! reservations. The list it keeps is advisory: between a refresh and a force
//! release the reservation may already have been released or taken by
//! another session, so every force release reports what the registry
//! actually did and refreshes right away.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use checador_core::{ReaderId, ReservationListEntry, SessionId};
use checador_network::{ReaderRegistry, ReservationClient, ReservationError};

use crate::config::MonitorConfig;

/// Shortest poll interval `run` will use.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of a successful force release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForceReleaseReport {
    pub reader: ReaderId,

    /// Holder shown by the list when the release was requested, if listed.
    pub listed_holder: Option<SessionId>,

    /// Holder after the follow-up refresh, if the reader was taken again.
    /// `None` inside `Some` means the reader is free; an outer `None` means
    /// the refresh failed.
    pub current_holder: Option<Option<SessionId>>,
}

impl ForceReleaseReport {
    /// Returns `true` if the refreshed list shows the reader free.
    pub fn is_free(&self) -> bool {
        matches!(self.current_holder, Some(None))
    }
}

/// Request sent to a running monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorCommand {
    Refresh,
    ForceRelease(ReaderId),
    Shutdown,
}

/// Notification from a running monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    Refreshed(Vec<ReservationListEntry>),
    RefreshFailed(ReservationError),
    Released(ForceReleaseReport),
    ReleaseFailed {
        reader: ReaderId,
        error: ReservationError,
    },
}

/// Administrative view of the registry's reservations.
///
/// # Example
///
/// ```
/// use checador_core::{ReaderId, SessionId};
/// use checador_monitor::{MonitorConfig, ReservationMonitor};
/// use checador_network::{InMemoryRegistry, ReaderRegistry, ReservationClient};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let reader = ReaderId::new("LECTOR-01").unwrap();
/// let registry = InMemoryRegistry::new();
/// registry.reserve(&reader, &SessionId::new("kiosk-a").unwrap()).await.unwrap();
///
/// let client = ReservationClient::new(registry, SessionId::generate());
/// let mut monitor = ReservationMonitor::new(client, MonitorConfig::default());
///
/// assert_eq!(monitor.refresh().await.unwrap().len(), 1);
/// let report = monitor.force_release(&reader).await.unwrap();
/// assert!(report.is_free());
/// assert!(monitor.entries().is_empty());
/// # }
/// ```
#[derive(Debug)]
pub struct ReservationMonitor<R> {
    client: ReservationClient<R>,
    config: MonitorConfig,
    entries: Vec<ReservationListEntry>,
    last_refresh: Option<DateTime<Utc>>,
    last_error: Option<ReservationError>,
}

impl<R: ReaderRegistry> ReservationMonitor<R> {
    pub fn new(client: ReservationClient<R>, config: MonitorConfig) -> Self {
        Self {
            client,
            config,
            entries: Vec::new(),
            last_refresh: None,
            last_error: None,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Reservations as of the last successful refresh.
    pub fn entries(&self) -> &[ReservationListEntry] {
        &self.entries
    }

    /// Holder of `reader` according to the last successful refresh.
    pub fn listed_holder(&self, reader: &ReaderId) -> Option<&SessionId> {
        self.entries
            .iter()
            .find(|entry| entry.reader_id == *reader)
            .map(|entry| &entry.session_id)
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.last_refresh
    }

    /// Error of the last refresh, cleared by the next successful one.
    pub fn last_error(&self) -> Option<&ReservationError> {
        self.last_error.as_ref()
    }

    /// Reload the reservation list.
    ///
    /// On failure the previous list is kept and the error recorded.
    pub async fn refresh(&mut self) -> Result<&[ReservationListEntry], ReservationError> {
        match self.client.list_reserved().await {
            Ok(entries) => {
                debug!(count = entries.len(), "Reservation list refreshed");
                self.entries = entries;
                self.last_refresh = Some(Utc::now());
                self.last_error = None;
                Ok(&self.entries)
            }
            Err(e) => {
                warn!(error = %e, "Failed to refresh reservation list");
                self.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Force the registry to drop any reservation of `reader`, then refresh.
    ///
    /// The registry decides: the call may release a different session than
    /// the list showed, or fail with `NotReserved` if the reader was already
    /// free. The list is refreshed in both of those cases.
    pub async fn force_release(
        &mut self,
        reader: &ReaderId,
    ) -> Result<ForceReleaseReport, ReservationError> {
        let listed_holder = self.listed_holder(reader).cloned();
        info!(reader = %reader, listed_holder = ?listed_holder, "Force releasing reader");

        match self.client.force_release(reader).await {
            Ok(()) => {
                let refreshed = self.refresh().await.is_ok();
                let current_holder = refreshed.then(|| self.listed_holder(reader).cloned());
                Ok(ForceReleaseReport {
                    reader: reader.clone(),
                    listed_holder,
                    current_holder,
                })
            }
            Err(e) => {
                warn!(reader = %reader, error = %e, "Force release rejected");
                if matches!(e, ReservationError::NotReserved { .. }) {
                    let _ = self.refresh().await;
                }
                Err(e)
            }
        }
    }

    /// Poll on the configured interval and serve commands until shut down.
    ///
    /// The first refresh happens immediately. Ends when `Shutdown` arrives,
    /// the command sender is dropped, or nobody listens to `events` anymore.
    pub async fn run(
        &mut self,
        mut commands: mpsc::UnboundedReceiver<MonitorCommand>,
        events: mpsc::UnboundedSender<MonitorEvent>,
    ) {
        let mut ticker = interval(self.config.poll_interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                _ = ticker.tick() => self.refresh_event().await,
                command = commands.recv() => match command {
                    Some(MonitorCommand::Refresh) => {
                        ticker.reset();
                        self.refresh_event().await
                    }
                    Some(MonitorCommand::ForceRelease(reader)) => {
                        match self.force_release(&reader).await {
                            Ok(report) => {
                                ticker.reset();
                                MonitorEvent::Released(report)
                            }
                            Err(error) => MonitorEvent::ReleaseFailed { reader, error },
                        }
                    }
                    Some(MonitorCommand::Shutdown) | None => break,
                },
            };

            if events.send(event).is_err() {
                debug!("Monitor listener gone");
                break;
            }
        }
    }

    async fn refresh_event(&mut self) -> MonitorEvent {
        match self.refresh().await {
            Ok(entries) => MonitorEvent::Refreshed(entries.to_vec()),
            Err(e) => MonitorEvent::RefreshFailed(e),
        }
    }
}
