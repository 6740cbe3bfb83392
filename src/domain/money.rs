use crate::error::{Result, VendError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Number of decimal places in one minor unit (cents).
pub const MINOR_UNIT_SCALE: u32 = 2;

/// A strictly positive amount of money in integer minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    pub fn new(minor_units: i64) -> Result<Self> {
        if minor_units > 0 {
            Ok(Self(minor_units))
        } else {
            Err(VendError::InvalidAmount(minor_units))
        }
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = VendError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// Renders minor units as a currency string, e.g. `125` -> `$1.25`.
pub fn format_minor_units(minor_units: i64) -> String {
    format!("${}", Decimal::new(minor_units, MINOR_UNIT_SCALE))
}

/// Customer credit that has been deposited but not yet spent or refunded.
///
/// The balance never goes negative: every mutation is checked before it is
/// applied, and a rejected mutation leaves the balance untouched. A negative
/// balance read back from a snapshot is rejected too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct EscrowLedger {
    credit_minor_units: i64,
}

impl TryFrom<i64> for EscrowLedger {
    type Error = VendError;

    fn try_from(balance: i64) -> Result<Self> {
        if balance < 0 {
            return Err(VendError::InvalidAmount(balance));
        }
        Ok(Self {
            credit_minor_units: balance,
        })
    }
}

impl From<EscrowLedger> for i64 {
    fn from(ledger: EscrowLedger) -> Self {
        ledger.credit_minor_units
    }
}

impl EscrowLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self) -> i64 {
        self.credit_minor_units
    }

    /// Adds credit. Rejects non-positive amounts.
    pub fn deposit(&mut self, amount: i64) -> Result<i64> {
        let amount = Amount::new(amount)?;
        self.credit_minor_units = self
            .credit_minor_units
            .checked_add(amount.minor_units())
            .ok_or(VendError::InvalidAmount(amount.minor_units()))?;
        Ok(self.credit_minor_units)
    }

    /// Removes credit, failing with the shortfall when the balance is too low.
    pub fn spend(&mut self, amount: i64) -> Result<i64> {
        let amount = Amount::new(amount)?;
        if self.credit_minor_units < amount.minor_units() {
            return Err(VendError::InsufficientFunds {
                required: amount.minor_units() - self.credit_minor_units,
            });
        }
        self.credit_minor_units -= amount.minor_units();
        Ok(self.credit_minor_units)
    }

    /// Returns all remaining credit and resets the balance to zero.
    pub fn refund(&mut self) -> i64 {
        std::mem::take(&mut self.credit_minor_units)
    }

    /// Shortfall against a price, zero when the balance already covers it.
    pub fn shortfall(&self, price: i64) -> i64 {
        (price - self.credit_minor_units).max(0)
    }
}
