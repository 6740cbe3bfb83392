use crate::domain::state::{TransactionState, Trigger};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VendError {
    #[error("invalid transition: {trigger} is not allowed from {from}")]
    InvalidTransition {
        from: TransactionState,
        trigger: Trigger,
    },
    #[error("insufficient funds: {required} more minor units required")]
    InsufficientFunds { required: i64 },
    #[error("invalid amount: {0}")]
    InvalidAmount(i64),
    #[error("product {0} is sold out")]
    SoldOut(String),
    #[error("unknown product: {0}")]
    UnknownProduct(String),
    #[error("gateway {0} timed out")]
    GatewayTimeout(String),
    #[error("gateway {gateway_id} failed: {reason}")]
    GatewayFailed { gateway_id: String, reason: String },
    #[error("all {attempted} payment gateways failed")]
    AllGatewaysFailed { attempted: usize },
    #[error("payment race cancelled")]
    PaymentCancelled,
    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

impl VendError {
    /// Business conditions the customer can resolve by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VendError::InsufficientFunds { .. }
                | VendError::SoldOut(_)
                | VendError::AllGatewaysFailed { .. }
                | VendError::PaymentCancelled
        )
    }

    pub(crate) fn persistence(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        VendError::PersistenceFailure(std::io::Error::other(err))
    }
}

pub type Result<T> = std::result::Result<T, VendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(VendError::InsufficientFunds { required: 5 }.is_retryable());
        assert!(VendError::AllGatewaysFailed { attempted: 2 }.is_retryable());
        assert!(!VendError::InvalidAmount(0).is_retryable());
        assert!(!VendError::persistence("disk full").is_retryable());
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = VendError::InvalidTransition {
            from: TransactionState::Idle,
            trigger: Trigger::Dispense,
        };
        assert_eq!(
            err.to_string(),
            "invalid transition: dispense is not allowed from idle"
        );
    }
}
