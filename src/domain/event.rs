use super::state::TransactionState;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where deposited credit came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum PaymentSource {
    Cash,
    Gateway(String),
}

impl fmt::Display for PaymentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentSource::Cash => f.write_str("cash"),
            PaymentSource::Gateway(id) => write!(f, "gateway:{id}"),
        }
    }
}

impl FromStr for PaymentSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s == "cash" => Ok(PaymentSource::Cash),
            Some(("gateway", id)) if !id.is_empty() => Ok(PaymentSource::Gateway(id.to_string())),
            _ => Err(format!("unknown payment source: {s}")),
        }
    }
}

impl From<PaymentSource> for String {
    fn from(source: PaymentSource) -> Self {
        source.to_string()
    }
}

impl TryFrom<String> for PaymentSource {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Facts recorded by the transaction state machine. Amounts are minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum DomainEvent {
    Deposited {
        amount: i64,
        source: PaymentSource,
    },
    Spent {
        amount: i64,
        sku: String,
    },
    Refunded {
        amount: i64,
    },
    ProductSelected {
        sku: String,
    },
    TransitionOccurred {
        from: TransactionState,
        to: TransactionState,
    },
    GatewaySucceeded {
        gateway_id: String,
    },
    GatewayFailed {
        gateway_id: String,
        reason: String,
    },
    Faulted {
        reason: String,
    },
    Vended {
        sku: String,
    },
}

/// Discriminant of [`DomainEvent`], used to filter replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Deposited,
    Spent,
    Refunded,
    ProductSelected,
    TransitionOccurred,
    GatewaySucceeded,
    GatewayFailed,
    Faulted,
    Vended,
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::Deposited { .. } => EventKind::Deposited,
            DomainEvent::Spent { .. } => EventKind::Spent,
            DomainEvent::Refunded { .. } => EventKind::Refunded,
            DomainEvent::ProductSelected { .. } => EventKind::ProductSelected,
            DomainEvent::TransitionOccurred { .. } => EventKind::TransitionOccurred,
            DomainEvent::GatewaySucceeded { .. } => EventKind::GatewaySucceeded,
            DomainEvent::GatewayFailed { .. } => EventKind::GatewayFailed,
            DomainEvent::Faulted { .. } => EventKind::Faulted,
            DomainEvent::Vended { .. } => EventKind::Vended,
        }
    }
}

/// One line of the event log: `{"timestamp", "type", "payload"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: DomainEvent,
}

impl EventRecord {
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim_end())
    }
}

/// Hands out strictly increasing UTC timestamps.
#[derive(Debug, Clone, Default)]
pub struct MonotonicClock {
    last: Option<DateTime<Utc>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the clock after an already persisted timestamp.
    pub fn resume_after(last: Option<DateTime<Utc>>) -> Self {
        Self { last }
    }

    pub fn observe(&mut self, timestamp: DateTime<Utc>) {
        if self.last.is_none_or(|last| timestamp > last) {
            self.last = Some(timestamp);
        }
    }

    pub fn next(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamped = match self.last {
            Some(last) if now <= last => last + TimeDelta::microseconds(1),
            _ => now,
        };
        self.last = Some(stamped);
        stamped
    }

    pub fn stamp(&mut self, event: DomainEvent) -> EventRecord {
        EventRecord {
            timestamp: self.next(),
            event,
        }
    }
}
