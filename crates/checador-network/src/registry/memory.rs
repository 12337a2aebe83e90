//! In-process reader registry for tests and demos.
//!
//! Enforces the same rules as the real registry: a reader has at most one
//! live reservation, a session can only release what it holds, and force
//! release works on any reserved reader. Failures can be injected per
//! operation, and every call is recorded so tests can assert exactly which
//! requests a component issued.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use checador_core::{ReaderId, ReservationListEntry, SessionId};

use super::ReaderRegistry;
use crate::error::{ReservationError, ScanServiceError};

/// A request received by an [`InMemoryRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCall {
    Reserve(ReaderId, SessionId),
    StartScanning(ReaderId, SessionId),
    StopScanning(ReaderId),
    Release(ReaderId, SessionId),
    ForceRelease(ReaderId),
    ListReserved,
    AvailableReaders,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Known readers; empty means any reader id is accepted.
    readers: BTreeSet<ReaderId>,
    reservations: BTreeMap<ReaderId, SessionId>,
    scanning: BTreeSet<ReaderId>,
    calls: Vec<RegistryCall>,
    offline: bool,
    start_failures: VecDeque<String>,
    stop_failures: VecDeque<String>,
    release_failures: VecDeque<String>,
}

/// Shared in-memory registry.
///
/// Clones share state, so a test can keep one clone for inspection while a
/// component under test owns another.
///
/// # Example
///
/// ```
/// use checador_core::{ReaderId, SessionId};
/// use checador_network::{InMemoryRegistry, ReaderRegistry, ReservationError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let registry = InMemoryRegistry::new();
/// let reader = ReaderId::new("LECTOR-01").unwrap();
/// let kiosk_a = SessionId::new("kiosk-a").unwrap();
/// let kiosk_b = SessionId::new("kiosk-b").unwrap();
///
/// registry.reserve(&reader, &kiosk_a).await.unwrap();
/// assert!(matches!(
///     registry.reserve(&reader, &kiosk_b).await,
///     Err(ReservationError::AlreadyReserved { .. })
/// ));
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl InMemoryRegistry {
    /// Registry accepting any reader id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that only knows `readers`; others are reported unavailable.
    pub fn with_readers(readers: impl IntoIterator<Item = ReaderId>) -> Self {
        let registry = Self::new();
        registry.lock().readers = readers.into_iter().collect();
        registry
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current holder of `reader`, if any.
    pub fn holder(&self, reader: &ReaderId) -> Option<SessionId> {
        self.lock().reservations.get(reader).cloned()
    }

    pub fn is_scanning(&self, reader: &ReaderId) -> bool {
        self.lock().scanning.contains(reader)
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<RegistryCall> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&RegistryCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Make every request fail with a transport error while `offline`.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Fail the next `start_scanning` with `message`.
    pub fn fail_next_start(&self, message: impl Into<String>) {
        self.lock().start_failures.push_back(message.into());
    }

    /// Fail the next `stop_scanning` with `message`.
    pub fn fail_next_stop(&self, message: impl Into<String>) {
        self.lock().stop_failures.push_back(message.into());
    }

    /// Fail the next `release` with `message`.
    pub fn fail_next_release(&self, message: impl Into<String>) {
        self.lock().release_failures.push_back(message.into());
    }

    /// Record `call` and return the locked state, or a transport error if
    /// the registry is offline.
    fn begin(&self, call: RegistryCall) -> Result<MutexGuard<'_, RegistryState>, String> {
        let mut state = self.lock();
        state.calls.push(call);
        if state.offline {
            return Err("registry offline".to_string());
        }
        Ok(state)
    }
}

impl RegistryState {
    fn knows(&self, reader: &ReaderId) -> bool {
        self.readers.is_empty() || self.readers.contains(reader)
    }
}

impl ReaderRegistry for InMemoryRegistry {
    async fn reserve(
        &self,
        reader: &ReaderId,
        session: &SessionId,
    ) -> Result<(), ReservationError> {
        let mut state = self
            .begin(RegistryCall::Reserve(reader.clone(), session.clone()))
            .map_err(ReservationError::transport)?;

        if !state.knows(reader) {
            return Err(ReservationError::unavailable(
                reader.as_str(),
                "unknown reader",
            ));
        }

        match state.reservations.get(reader) {
            Some(holder) if holder == session => Ok(()),
            Some(_) => Err(ReservationError::already_reserved(reader.as_str())),
            None => {
                debug!(reader = %reader, session = %session, "Reserved");
                state.reservations.insert(reader.clone(), session.clone());
                Ok(())
            }
        }
    }

    async fn start_scanning(
        &self,
        reader: &ReaderId,
        session: &SessionId,
    ) -> Result<(), ScanServiceError> {
        let mut state = self
            .begin(RegistryCall::StartScanning(reader.clone(), session.clone()))
            .map_err(ScanServiceError::transport)?;

        if let Some(message) = state.start_failures.pop_front() {
            return Err(ScanServiceError::start_failed(reader.as_str(), message));
        }
        if state.reservations.get(reader) != Some(session) {
            return Err(ScanServiceError::start_failed(
                reader.as_str(),
                "reader is not reserved by this session",
            ));
        }

        state.scanning.insert(reader.clone());
        Ok(())
    }

    async fn stop_scanning(&self, reader: &ReaderId) -> Result<(), ScanServiceError> {
        let mut state = self
            .begin(RegistryCall::StopScanning(reader.clone()))
            .map_err(ScanServiceError::transport)?;

        if let Some(message) = state.stop_failures.pop_front() {
            return Err(ScanServiceError::stop_failed(reader.as_str(), message));
        }

        state.scanning.remove(reader);
        Ok(())
    }

    async fn release(
        &self,
        reader: &ReaderId,
        session: &SessionId,
    ) -> Result<(), ReservationError> {
        let mut state = self
            .begin(RegistryCall::Release(reader.clone(), session.clone()))
            .map_err(ReservationError::transport)?;

        if let Some(message) = state.release_failures.pop_front() {
            return Err(ReservationError::rejected(500, message));
        }

        if state.reservations.get(reader) == Some(session) {
            debug!(reader = %reader, session = %session, "Released");
            state.reservations.remove(reader);
            state.scanning.remove(reader);
        }
        Ok(())
    }

    async fn force_release(&self, reader: &ReaderId) -> Result<(), ReservationError> {
        let mut state = self
            .begin(RegistryCall::ForceRelease(reader.clone()))
            .map_err(ReservationError::transport)?;

        match state.reservations.remove(reader) {
            Some(holder) => {
                debug!(reader = %reader, session = %holder, "Force released");
                state.scanning.remove(reader);
                Ok(())
            }
            None => Err(ReservationError::not_reserved(reader.as_str())),
        }
    }

    async fn list_reserved(&self) -> Result<Vec<ReservationListEntry>, ReservationError> {
        let state = self
            .begin(RegistryCall::ListReserved)
            .map_err(ReservationError::transport)?;

        Ok(state
            .reservations
            .iter()
            .map(|(reader, session)| ReservationListEntry::new(reader.clone(), session.clone()))
            .collect())
    }

    async fn available_readers(&self) -> Result<Vec<ReaderId>, ReservationError> {
        let state = self
            .begin(RegistryCall::AvailableReaders)
            .map_err(ReservationError::transport)?;

        Ok(state
            .readers
            .iter()
            .filter(|reader| !state.reservations.contains_key(*reader))
            .cloned()
            .collect())
    }
}
