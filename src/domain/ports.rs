use super::event::{DomainEvent, EventKind, EventRecord};
use super::machine::MachineState;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Durable, append-only history of domain events plus the latest snapshot.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Stamps and appends one event. Returns only once the record is durable.
    async fn append(&self, event: DomainEvent) -> Result<EventRecord>;

    /// Every well-formed record in append order. Malformed records are skipped.
    async fn replay_all(&self) -> Result<Vec<EventRecord>>;

    async fn load_latest_snapshot(&self) -> Result<Option<MachineState>>;

    /// Atomically replaces the snapshot and clears the log.
    async fn write_snapshot(&self, state: &MachineState) -> Result<()>;

    fn events_since_snapshot(&self) -> usize;

    fn snapshot_threshold(&self) -> usize;

    async fn replay(&self, kind: EventKind) -> Result<Vec<EventRecord>> {
        let records = self.replay_all().await?;
        Ok(records
            .into_iter()
            .filter(|record| record.event.kind() == kind)
            .collect())
    }

    /// Writes a snapshot once more than `snapshot_threshold` events have been
    /// appended since the previous one. Returns whether a snapshot was taken.
    async fn checkpoint(&self, state: &MachineState) -> Result<bool> {
        if self.events_since_snapshot() > self.snapshot_threshold() {
            self.write_snapshot(state).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

pub type EventStoreBox = Box<dyn EventStore>;

/// Status reported by a payment provider for one payment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Success,
    Timeout,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => f.write_str("pending"),
            PaymentStatus::Success => f.write_str("success"),
            PaymentStatus::Timeout => f.write_str("timeout"),
        }
    }
}

/// A virtual payment provider.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn id(&self) -> &str;

    /// Creates a payment request for `amount` minor units and returns its
    /// reference (typically a URL rendered as a QR code).
    async fn generate_payment_request(&self, amount: i64) -> Result<String>;

    async fn poll_status(&self, reference: &str) -> Result<PaymentStatus>;
}

pub type GatewayAdapterRef = Arc<dyn GatewayAdapter>;
