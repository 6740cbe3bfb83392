use crate::domain::event::PaymentSource;
use crate::domain::money::format_minor_units;
use crate::domain::state::TransactionState;
use tokio::sync::broadcast;

/// Push-style updates for UI and dashboard subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    StateChanged {
        state: TransactionState,
        selected_sku: Option<String>,
        escrow: i64,
    },
    DepositConfirmed {
        amount: i64,
        balance: i64,
        source: PaymentSource,
    },
    InsufficientFunds {
        sku: String,
        required: i64,
    },
    /// A gateway produced a payment reference the customer can scan.
    PaymentRequested {
        gateway_id: String,
        reference: String,
    },
    PaymentFailed {
        attempted: usize,
    },
    Dispensed {
        sku: String,
        remaining_credit: i64,
    },
    Refunded {
        amount: i64,
    },
    NothingToRefund,
    SoldOut {
        sku: String,
    },
    Fault {
        reason: String,
        owner_contact: Option<String>,
    },
}

impl Notification {
    /// Text shown to the customer for this notification.
    pub fn customer_message(&self) -> String {
        match self {
            Notification::StateChanged { state, .. } => match state {
                TransactionState::Idle => "Welcome! Insert funds or select a product.".to_string(),
                TransactionState::Interacting => {
                    "Please insert funds or select a product.".to_string()
                }
                TransactionState::Dispensing => "Dispensing your product...".to_string(),
                TransactionState::Error => "Machine unavailable.".to_string(),
            },
            Notification::DepositConfirmed {
                amount, balance, ..
            } => format!(
                "{} deposited. Current balance: {}.",
                format_minor_units(*amount),
                format_minor_units(*balance)
            ),
            Notification::InsufficientFunds { required, .. } => format!(
                "Insufficient funds. Please insert an additional {}.",
                format_minor_units(*required)
            ),
            Notification::PaymentRequested { gateway_id, .. } => {
                format!("Virtual payment option ({gateway_id}): scan the QR code.")
            }
            Notification::PaymentFailed { .. } => {
                "Virtual payment was not completed. Please try again.".to_string()
            }
            Notification::Dispensed {
                remaining_credit, ..
            } if *remaining_credit > 0 => format!(
                "Product dispensed. Remaining credit: {}.",
                format_minor_units(*remaining_credit)
            ),
            Notification::Dispensed { .. } => {
                "Product dispensed. Thank you for your purchase!".to_string()
            }
            Notification::Refunded { amount } => {
                format!("Refund of {} issued.", format_minor_units(*amount))
            }
            Notification::NothingToRefund => "No funds to refund.".to_string(),
            Notification::SoldOut { sku } => {
                format!("{sku} is sold out. Please select another product.")
            }
            Notification::Fault { owner_contact, .. } => match owner_contact {
                Some(contact) => format!("An error has occurred. Please contact {contact}."),
                None => "An error has occurred. Please contact support.".to_string(),
            },
        }
    }
}

/// Broadcast publisher. Publishing with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn publish(&self, notification: Notification) {
        tracing::debug!(?notification, "Publishing notification");
        let _ = self.tx.send(notification);
    }
}
