use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-wide state of the vending cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    #[default]
    Idle,
    Interacting,
    Dispensing,
    Error,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Idle => "idle",
            TransactionState::Interacting => "interacting",
            TransactionState::Dispensing => "dispensing",
            TransactionState::Error => "error",
        }
    }

    /// States in which the customer may deposit, select or ask for a refund.
    pub fn accepts_customer_input(&self) -> bool {
        matches!(
            self,
            TransactionState::Idle | TransactionState::Interacting
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that can drive a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    StartInteraction,
    Dispense,
    CompleteWithCredit,
    CompleteWithoutCredit,
    Fault,
    Recover,
    /// Customer walked away; escrow has already been refunded.
    Abandon,
    /// Not a transition. Used to report selection/deposit/refund attempts
    /// made while the machine is busy.
    CustomerInput,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::StartInteraction => "start_interaction",
            Trigger::Dispense => "dispense",
            Trigger::CompleteWithCredit => "complete_with_credit",
            Trigger::CompleteWithoutCredit => "complete_without_credit",
            Trigger::Fault => "fault",
            Trigger::Recover => "recover",
            Trigger::Abandon => "abandon",
            Trigger::CustomerInput => "customer_input",
        };
        f.write_str(name)
    }
}

/// Values the guards are evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardInputs {
    /// Escrow balance. For completion triggers this is the balance after the
    /// price has been deducted.
    pub escrow: i64,
    /// Price of the selected product, if any.
    pub price: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    pub from: TransactionState,
    pub trigger: Trigger,
}

impl From<TransitionError> for crate::error::VendError {
    fn from(err: TransitionError) -> Self {
        crate::error::VendError::InvalidTransition {
            from: err.from,
            trigger: err.trigger,
        }
    }
}

/// The transition table. Pure: no I/O, no mutation.
pub fn transition(
    current: TransactionState,
    trigger: Trigger,
    guard: GuardInputs,
) -> Result<TransactionState, TransitionError> {
    use TransactionState::*;

    let next = match (current, trigger) {
        (_, Trigger::Fault) => Some(Error),
        (Idle, Trigger::StartInteraction) => Some(Interacting),
        (Interacting, Trigger::Dispense) => match guard.price {
            Some(price) if guard.escrow >= price => Some(Dispensing),
            _ => None,
        },
        (Dispensing, Trigger::CompleteWithCredit) if guard.escrow > 0 => Some(Interacting),
        (Dispensing, Trigger::CompleteWithoutCredit) if guard.escrow == 0 => Some(Idle),
        (Error, Trigger::Recover) => Some(Idle),
        (Interacting, Trigger::Abandon) if guard.escrow == 0 => Some(Idle),
        _ => None,
    };

    next.ok_or(TransitionError {
        from: current,
        trigger,
    })
}
