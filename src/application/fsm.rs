use crate::domain::event::{DomainEvent, EventKind, EventRecord, PaymentSource};
use crate::domain::machine::MachineState;
use crate::domain::money::Amount;
use crate::domain::ports::{EventStore, EventStoreBox};
use crate::domain::product::Product;
use crate::domain::state::{GuardInputs, TransactionState, Trigger, transition};
use crate::error::{Result, VendError};
use chrono::Utc;

/// The transaction state machine.
///
/// Single writer of the event store. Every change is appended first and only
/// then folded into the in-memory state, so a failed append leaves the state
/// as it was.
pub struct TransactionFsm {
    store: EventStoreBox,
    machine: MachineState,
}

impl TransactionFsm {
    /// Wraps a store and the state recovered from it.
    pub fn new(store: EventStoreBox, machine: MachineState) -> Self {
        Self { store, machine }
    }

    pub fn state(&self) -> TransactionState {
        self.machine.state
    }

    pub fn machine(&self) -> &MachineState {
        &self.machine
    }

    pub fn escrow(&self) -> i64 {
        self.machine.escrow.balance()
    }

    pub fn selected_sku(&self) -> Option<&str> {
        self.machine.selected_sku.as_deref()
    }

    pub fn store(&self) -> &dyn EventStore {
        self.store.as_ref()
    }

    /// Records a product choice, starting an interaction when idle.
    pub async fn select_product(&mut self, sku: &str) -> Result<TransactionState> {
        self.require_customer_input()?;
        self.commit(DomainEvent::ProductSelected {
            sku: sku.to_string(),
        })
        .await?;
        if self.state() == TransactionState::Idle {
            self.fire(Trigger::StartInteraction, self.guard(None)).await?;
        }
        self.checkpoint().await;
        Ok(self.state())
    }

    /// Credits escrow. Returns the new balance.
    pub async fn deposit(&mut self, amount: i64, source: PaymentSource) -> Result<i64> {
        let amount = Amount::new(amount)?.minor_units();
        self.require_customer_input()?;
        self.commit(DomainEvent::Deposited { amount, source }).await?;
        self.checkpoint().await;
        Ok(self.escrow())
    }

    /// Returns the whole escrow. An empty escrow refunds zero and records nothing.
    pub async fn request_refund(&mut self) -> Result<i64> {
        self.require_customer_input()?;
        let amount = self.escrow();
        if amount == 0 {
            return Ok(0);
        }
        self.commit(DomainEvent::Refunded { amount }).await?;
        self.checkpoint().await;
        Ok(amount)
    }

    /// Moves to `Dispensing` and deducts the price of `product` from escrow.
    pub async fn dispense(&mut self, product: &Product) -> Result<()> {
        if self.selected_sku() != Some(product.sku.as_str()) {
            return Err(VendError::InvalidTransition {
                from: self.state(),
                trigger: Trigger::Dispense,
            });
        }
        let next = transition(
            self.state(),
            Trigger::Dispense,
            self.guard(Some(product.price_minor_units)),
        )?;
        if product.tracks_inventory
            && self.machine.inventory_of(&product.sku).unwrap_or(0) <= 0
        {
            return Err(VendError::SoldOut(product.sku.clone()));
        }

        self.commit(DomainEvent::TransitionOccurred {
            from: self.state(),
            to: next,
        })
        .await?;
        self.commit(DomainEvent::Spent {
            amount: product.price_minor_units,
            sku: product.sku.clone(),
        })
        .await?;
        self.checkpoint().await;
        Ok(())
    }

    /// Confirms the product left the machine and ends the dispense cycle.
    ///
    /// Goes back to `Interacting` while credit remains, otherwise to `Idle`.
    pub async fn complete(&mut self, product: &Product) -> Result<TransactionState> {
        let trigger = if self.escrow() > 0 {
            Trigger::CompleteWithCredit
        } else {
            Trigger::CompleteWithoutCredit
        };
        if self.selected_sku() != Some(product.sku.as_str()) {
            return Err(VendError::InvalidTransition {
                from: self.state(),
                trigger,
            });
        }
        let next = transition(self.state(), trigger, self.guard(None))?;

        self.commit(DomainEvent::Vended {
            sku: product.sku.clone(),
        })
        .await?;
        self.commit(DomainEvent::TransitionOccurred {
            from: self.state(),
            to: next,
        })
        .await?;
        self.checkpoint().await;
        Ok(self.state())
    }

    /// Enters `Error` from any state. Escrow is kept.
    pub async fn fault(&mut self, reason: &str) -> Result<()> {
        self.commit(DomainEvent::Faulted {
            reason: reason.to_string(),
        })
        .await?;
        self.checkpoint().await;
        Ok(())
    }

    /// Leaves `Error` for `Idle`, keeping escrow for a later refund or purchase.
    pub async fn recover(&mut self) -> Result<()> {
        self.fire(Trigger::Recover, self.guard(None)).await?;
        self.checkpoint().await;
        Ok(())
    }

    /// Ends an interaction the customer walked away from: refunds whatever is
    /// left and returns to `Idle`. Returns the refunded amount.
    pub async fn abandon(&mut self) -> Result<i64> {
        if self.state() != TransactionState::Interacting {
            return Err(VendError::InvalidTransition {
                from: self.state(),
                trigger: Trigger::Abandon,
            });
        }
        let amount = self.escrow();
        if amount > 0 {
            self.commit(DomainEvent::Refunded { amount }).await?;
        }
        self.fire(Trigger::Abandon, self.guard(None)).await?;
        self.checkpoint().await;
        Ok(amount)
    }

    /// Records a payment a gateway captured and credits it to escrow.
    ///
    /// Accepted in any state: the money is already taken, so it must land
    /// somewhere a refund can reach, even if the machine faulted meanwhile.
    pub async fn credit_gateway_payment(&mut self, gateway_id: &str, amount: i64) -> Result<i64> {
        let amount = Amount::new(amount)?.minor_units();
        self.commit(DomainEvent::GatewaySucceeded {
            gateway_id: gateway_id.to_string(),
        })
        .await?;
        self.commit(DomainEvent::Deposited {
            amount,
            source: PaymentSource::Gateway(gateway_id.to_string()),
        })
        .await?;
        self.checkpoint().await;
        Ok(self.escrow())
    }

    pub async fn record_gateway_failure(&mut self, gateway_id: &str, reason: &str) -> Result<()> {
        self.commit(DomainEvent::GatewayFailed {
            gateway_id: gateway_id.to_string(),
            reason: reason.to_string(),
        })
        .await
        .map(|_| ())
    }

    fn guard(&self, price: Option<i64>) -> GuardInputs {
        GuardInputs {
            escrow: self.escrow(),
            price,
        }
    }

    fn require_customer_input(&self) -> Result<()> {
        if self.state().accepts_customer_input() {
            Ok(())
        } else {
            Err(VendError::InvalidTransition {
                from: self.state(),
                trigger: Trigger::CustomerInput,
            })
        }
    }

    async fn fire(&mut self, trigger: Trigger, guard: GuardInputs) -> Result<TransactionState> {
        let from = self.state();
        let to = transition(from, trigger, guard)?;
        self.commit(DomainEvent::TransitionOccurred { from, to }).await?;
        tracing::info!(%from, %to, %trigger, "State transition");
        Ok(to)
    }

    /// Appends `event` and folds it into the live state.
    ///
    /// The event is folded into a scratch copy first, so a record the state
    /// would reject is never written.
    async fn commit(&mut self, event: DomainEvent) -> Result<EventRecord> {
        let kind = event.kind();
        let mut staged = self.machine.clone();
        staged.apply(&EventRecord {
            timestamp: Utc::now(),
            event: event.clone(),
        })?;

        match self.store.append(event).await {
            Ok(record) => {
                staged.timestamp = Some(record.timestamp);
                self.machine = staged;
                Ok(record)
            }
            Err(e) => {
                tracing::error!(?kind, error = %e, "Failed to record event, state unchanged");
                if kind != EventKind::Faulted {
                    self.fault_after_persistence_failure(&e).await;
                }
                Err(e)
            }
        }
    }

    /// Best effort: a store that rejected one append will often reject this too.
    async fn fault_after_persistence_failure(&mut self, cause: &VendError) {
        let event = DomainEvent::Faulted {
            reason: format!("persistence failure: {cause}"),
        };
        match self.store.append(event).await {
            Ok(record) => {
                if self.machine.apply(&record).is_ok() {
                    tracing::warn!("Machine faulted after persistence failure");
                }
            }
            Err(e) => tracing::error!(error = %e, "Could not record fault"),
        }
    }

    /// Snapshots when the store asks for it. Failure is logged; the log
    /// still holds every event.
    async fn checkpoint(&self) {
        match self.store.checkpoint(&self.machine).await {
            Ok(true) => tracing::debug!("Checkpoint written"),
            Ok(false) => {}
            Err(e) => tracing::error!(error = %e, "Checkpoint failed"),
        }
    }
}
