use super::event::{DomainEvent, EventRecord, PaymentSource};
use super::money::EscrowLedger;
use super::product::Catalog;
use super::state::TransactionState;
use crate::error::{Result, VendError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-SKU sales counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SkuSales {
    pub vend_count: u64,
    pub revenue_minor_units: i64,
}

/// Full reconstructed state of the machine.
///
/// This is both the live state held by the transaction state machine and the
/// snapshot record written by the event store. It only ever changes through
/// [`MachineState::apply`], so replaying the log over a snapshot rebuilds the
/// exact live value. Maps are ordered to keep the serialized form stable.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachineState {
    pub state: TransactionState,
    pub escrow: EscrowLedger,
    /// Live stock for products that track inventory.
    pub inventory: BTreeMap<String, i64>,
    /// Timestamp of the last event folded into this state.
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub selected_sku: Option<String>,
    #[serde(default)]
    pub last_payment_source: Option<PaymentSource>,
    #[serde(default)]
    pub sales: BTreeMap<String, SkuSales>,
}

impl MachineState {
    /// Default state for a machine with no history.
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let mut state = Self::default();
        state.seed_inventory(catalog);
        state
    }

    /// Adds stock entries for tracked products the state has never seen.
    pub fn seed_inventory(&mut self, catalog: &Catalog) {
        for product in catalog.products().iter().filter(|p| p.tracks_inventory) {
            self.inventory
                .entry(product.sku.clone())
                .or_insert(product.inventory_count);
        }
    }

    pub fn inventory_of(&self, sku: &str) -> Option<i64> {
        self.inventory.get(sku).copied()
    }

    pub fn sales_of(&self, sku: &str) -> SkuSales {
        self.sales.get(sku).copied().unwrap_or_default()
    }

    /// Folds one event into the state.
    ///
    /// A record that would break an invariant is rejected and leaves the
    /// state untouched.
    pub fn apply(&mut self, record: &EventRecord) -> Result<()> {
        match &record.event {
            DomainEvent::Deposited { amount, source } => {
                self.escrow.deposit(*amount)?;
                self.last_payment_source = Some(source.clone());
            }
            DomainEvent::Spent { amount, sku } => {
                self.escrow.spend(*amount)?;
                let sales = self.sales.entry(sku.clone()).or_default();
                sales.revenue_minor_units = sales.revenue_minor_units.saturating_add(*amount);
            }
            DomainEvent::Refunded { amount } => {
                let refunded = self.escrow.refund();
                if refunded != *amount {
                    tracing::warn!(
                        recorded = amount,
                        balance = refunded,
                        "Refund record does not match escrow balance"
                    );
                }
            }
            DomainEvent::ProductSelected { sku } => {
                self.selected_sku = Some(sku.clone());
            }
            DomainEvent::TransitionOccurred { from, to } => {
                if self.state != *from {
                    tracing::warn!(
                        expected = %from,
                        actual = %self.state,
                        to = %to,
                        "Transition record starts from a different state"
                    );
                }
                self.state = *to;
                if *to == TransactionState::Idle {
                    self.selected_sku = None;
                }
            }
            DomainEvent::Vended { sku } => {
                if let Some(count) = self.inventory.get_mut(sku) {
                    if *count <= 0 {
                        return Err(VendError::SoldOut(sku.clone()));
                    }
                    *count -= 1;
                }
                let sales = self.sales.entry(sku.clone()).or_default();
                sales.vend_count = sales.vend_count.saturating_add(1);
                self.selected_sku = None;
            }
            DomainEvent::Faulted { .. } => {
                self.state = TransactionState::Error;
            }
            DomainEvent::GatewaySucceeded { .. } | DomainEvent::GatewayFailed { .. } => {}
        }
        self.timestamp = Some(record.timestamp);
        Ok(())
    }
}
