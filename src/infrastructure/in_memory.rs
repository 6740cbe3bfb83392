use super::parse_log;
use crate::domain::event::{DomainEvent, EventRecord, MonotonicClock};
use crate::domain::machine::MachineState;
use crate::domain::ports::EventStore;
use crate::error::{Result, VendError};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

pub const DEFAULT_SNAPSHOT_THRESHOLD: usize = 100;

#[derive(Default)]
struct Inner {
    lines: Vec<String>,
    snapshot: Option<String>,
    clock: MonotonicClock,
}

/// A thread-safe in-memory event store.
///
/// Records are kept in their serialized line form so replay goes through the
/// same codec as the file store. `Clone` shares the underlying log, which lets
/// tests keep a handle after boxing the store. Appends can be made to fail on
/// demand to exercise persistence failures.
#[derive(Clone)]
pub struct InMemoryEventStore {
    inner: Arc<Mutex<Inner>>,
    events_since_snapshot: Arc<AtomicUsize>,
    fail_appends: Arc<AtomicBool>,
    threshold: usize,
}

impl InMemoryEventStore {
    /// Creates a new, empty in-memory event store.
    pub fn new() -> Self {
        Self::with_snapshot_threshold(DEFAULT_SNAPSHOT_THRESHOLD)
    }

    pub fn with_snapshot_threshold(threshold: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            events_since_snapshot: Arc::new(AtomicUsize::new(0)),
            fail_appends: Arc::new(AtomicBool::new(false)),
            threshold,
        }
    }

    /// Makes every following append (and snapshot) fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.fail_appends.store(failing, Ordering::SeqCst);
    }

    /// Appends a raw line without validation.
    pub async fn push_raw_line(&self, line: &str) {
        let mut inner = self.inner.lock().await;
        inner.lines.push(line.to_string());
        self.events_since_snapshot.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn lines(&self) -> Vec<String> {
        self.inner.lock().await.lines.clone()
    }

    pub async fn has_snapshot(&self) -> bool {
        self.inner.lock().await.snapshot.is_some()
    }

    fn check_failing(&self) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            Err(VendError::persistence("in-memory store is failing"))
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: DomainEvent) -> Result<EventRecord> {
        self.check_failing()?;
        let mut inner = self.inner.lock().await;
        let record = inner.clock.stamp(event);
        let line = record.to_line().map_err(VendError::persistence)?;
        inner.lines.push(line);
        self.events_since_snapshot.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn replay_all(&self) -> Result<Vec<EventRecord>> {
        let inner = self.inner.lock().await;
        Ok(parse_log(inner.lines.iter().map(String::as_str)))
    }

    async fn load_latest_snapshot(&self) -> Result<Option<MachineState>> {
        let inner = self.inner.lock().await;
        inner
            .snapshot
            .as_deref()
            .map(|json| serde_json::from_str(json).map_err(VendError::persistence))
            .transpose()
    }

    async fn write_snapshot(&self, state: &MachineState) -> Result<()> {
        self.check_failing()?;
        let json = serde_json::to_string_pretty(state).map_err(VendError::persistence)?;
        let mut inner = self.inner.lock().await;
        inner.snapshot = Some(json);
        inner.lines.clear();
        self.events_since_snapshot.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn events_since_snapshot(&self) -> usize {
        self.events_since_snapshot.load(Ordering::SeqCst)
    }

    fn snapshot_threshold(&self) -> usize {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{EventKind, PaymentSource};

    fn deposit(amount: i64) -> DomainEvent {
        DomainEvent::Deposited {
            amount,
            source: PaymentSource::Cash,
        }
    }

    #[tokio::test]
    async fn test_append_and_replay_in_order() {
        let store = InMemoryEventStore::new();
        let first = store.append(deposit(10)).await.unwrap();
        let second = store.append(deposit(20)).await.unwrap();
        assert!(second.timestamp > first.timestamp);

        let records = store.replay_all().await.unwrap();
        assert_eq!(records, vec![first, second]);
        assert_eq!(store.events_since_snapshot(), 2);
    }

    #[tokio::test]
    async fn test_replay_filters_by_kind() {
        let store = InMemoryEventStore::new();
        store.append(deposit(10)).await.unwrap();
        store
            .append(DomainEvent::Refunded { amount: 10 })
            .await
            .unwrap();

        let refunds = store.replay(EventKind::Refunded).await.unwrap();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].event, DomainEvent::Refunded { amount: 10 });
    }

    #[tokio::test]
    async fn test_failing_append_records_nothing() {
        let store = InMemoryEventStore::new();
        store.set_failing(true);
        assert!(matches!(
            store.append(deposit(10)).await,
            Err(VendError::PersistenceFailure(_))
        ));
        assert!(store.lines().await.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_clears_log() {
        let store = InMemoryEventStore::new();
        store.append(deposit(10)).await.unwrap();

        let mut state = MachineState::default();
        state.escrow.deposit(10).unwrap();
        store.write_snapshot(&state).await.unwrap();

        assert!(store.lines().await.is_empty());
        assert_eq!(store.events_since_snapshot(), 0);
        assert_eq!(store.load_latest_snapshot().await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_checkpoint_waits_for_threshold() {
        let store = InMemoryEventStore::with_snapshot_threshold(2);
        let state = MachineState::default();

        store.append(deposit(1)).await.unwrap();
        store.append(deposit(1)).await.unwrap();
        assert!(!store.checkpoint(&state).await.unwrap());

        store.append(deposit(1)).await.unwrap();
        assert!(store.checkpoint(&state).await.unwrap());
        assert!(store.has_snapshot().await);
    }
}
