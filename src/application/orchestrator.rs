use crate::application::fsm::TransactionFsm;
use crate::application::notifications::{Notification, Notifier};
use crate::application::race::{GatewayOutcome, PaymentRace, RaceReport};
use crate::application::recovery::recover;
use crate::config::MachineConfig;
use crate::domain::event::{EventRecord, PaymentSource};
use crate::domain::machine::{MachineState, SkuSales};
use crate::domain::ports::{EventStoreBox, GatewayAdapterRef};
use crate::domain::product::{Catalog, Product};
use crate::domain::state::{TransactionState, Trigger};
use crate::error::{Result, VendError};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What the UI and dashboard show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineStatus {
    pub state: TransactionState,
    pub selected_sku: Option<String>,
    pub escrow: i64,
    pub inventory: BTreeMap<String, i64>,
    pub sales: BTreeMap<String, SkuSales>,
}

impl From<&MachineState> for MachineStatus {
    fn from(machine: &MachineState) -> Self {
        Self {
            state: machine.state,
            selected_sku: machine.selected_sku.clone(),
            escrow: machine.escrow.balance(),
            inventory: machine.inventory.clone(),
            sales: machine.sales.clone(),
        }
    }
}

/// Coordinates the catalog, the transaction state machine and the payment
/// gateways.
///
/// All state changes go through one async mutex around the FSM. A payment
/// race runs with that lock released, so status reads, refunds and faults
/// stay possible while gateways are polled.
pub struct Orchestrator {
    fsm: Mutex<TransactionFsm>,
    catalog: Catalog,
    gateways: Vec<GatewayAdapterRef>,
    race: PaymentRace,
    notifier: Notifier,
    config: MachineConfig,
    active_race: StdMutex<Option<CancellationToken>>,
    last_activity: StdMutex<Instant>,
}

impl Orchestrator {
    /// Recovers state from `store` and readies the machine.
    ///
    /// A machine that went down mid-dispense comes back faulted.
    pub async fn start(
        catalog: Catalog,
        store: EventStoreBox,
        gateways: Vec<GatewayAdapterRef>,
        config: MachineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let machine = recover(store.as_ref(), &catalog).await?;
        let mut fsm = TransactionFsm::new(store, machine);
        if fsm.state() == TransactionState::Dispensing {
            tracing::warn!(
                sku = fsm.selected_sku().unwrap_or_default(),
                "Recovered mid-dispense, faulting machine"
            );
            fsm.fault("interrupted dispense").await?;
        }

        let notifier = Notifier::new(config.notification_capacity);
        let race = PaymentRace::new(config.race_config()).with_notifier(notifier.clone());
        tracing::info!(
            products = catalog.products().len(),
            gateways = gateways.len(),
            state = %fsm.state(),
            "Machine ready"
        );

        Ok(Self {
            fsm: Mutex::new(fsm),
            catalog,
            gateways,
            race,
            notifier,
            config,
            active_race: StdMutex::new(None),
            last_activity: StdMutex::new(Instant::now()),
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub async fn status(&self) -> MachineStatus {
        MachineStatus::from(self.fsm.lock().await.machine())
    }

    pub async fn machine_state(&self) -> MachineState {
        self.fsm.lock().await.machine().clone()
    }

    /// Every record in the event log since the last snapshot.
    pub async fn history(&self) -> Result<Vec<EventRecord>> {
        self.fsm.lock().await.store().replay_all().await
    }

    /// Cash deposit. Returns the new escrow balance.
    pub async fn deposit(&self, amount: i64) -> Result<i64> {
        self.touch();
        let mut fsm = self.fsm.lock().await;
        let balance = fsm.deposit(amount, PaymentSource::Cash).await?;
        self.notifier.publish(Notification::DepositConfirmed {
            amount,
            balance,
            source: PaymentSource::Cash,
        });
        self.publish_state(&fsm);
        Ok(balance)
    }

    pub async fn select_product(&self, sku: &str) -> Result<()> {
        self.touch();
        let product = self.product(sku)?;
        let mut fsm = self.fsm.lock().await;
        if Self::sold_out(&fsm, product) {
            self.notifier.publish(Notification::SoldOut {
                sku: sku.to_string(),
            });
            return Err(VendError::SoldOut(sku.to_string()));
        }
        fsm.select_product(sku).await?;
        self.publish_state(&fsm);
        Ok(())
    }

    /// Pays for the selected product and starts dispensing it.
    ///
    /// Escrow is used first. A shortfall is raced across the virtual gateways;
    /// the winning payment is credited and the purchase is re-evaluated once.
    pub async fn process_payment(&self) -> Result<()> {
        self.touch();
        let (sku, shortfall) = {
            let mut fsm = self.fsm.lock().await;
            let product = self.selected_product(&fsm)?;
            let shortfall = fsm.machine().escrow.shortfall(product.price_minor_units);
            if shortfall == 0 {
                return self.dispense(&mut fsm, product).await;
            }
            if self.gateways.is_empty() {
                return Err(self.insufficient(product, shortfall));
            }
            (product.sku.clone(), shortfall)
        };

        let report = self.run_race(shortfall).await;

        let mut fsm = self.fsm.lock().await;
        self.settle_race(&mut fsm, &sku, shortfall, report).await
    }

    /// Confirms the dispensed product was delivered.
    pub async fn finish_dispensing(&self) -> Result<TransactionState> {
        self.touch();
        let mut fsm = self.fsm.lock().await;
        let product = match fsm.selected_sku() {
            Some(sku) if fsm.state() == TransactionState::Dispensing => self.product(sku)?,
            _ => {
                let trigger = if fsm.escrow() > 0 {
                    Trigger::CompleteWithCredit
                } else {
                    Trigger::CompleteWithoutCredit
                };
                return Err(VendError::InvalidTransition {
                    from: fsm.state(),
                    trigger,
                });
            }
        };
        let state = fsm.complete(product).await?;
        self.notifier.publish(Notification::Dispensed {
            sku: product.sku.clone(),
            remaining_credit: fsm.escrow(),
        });
        self.publish_state(&fsm);
        Ok(state)
    }

    /// Select, pay and finish in one call.
    pub async fn vend(&self, sku: &str) -> Result<TransactionState> {
        self.select_product(sku).await?;
        self.process_payment().await?;
        self.finish_dispensing().await
    }

    pub async fn request_refund(&self) -> Result<i64> {
        self.touch();
        let mut fsm = self.fsm.lock().await;
        let amount = fsm.request_refund().await?;
        if amount > 0 {
            self.notifier.publish(Notification::Refunded { amount });
        } else {
            self.notifier.publish(Notification::NothingToRefund);
        }
        self.publish_state(&fsm);
        Ok(amount)
    }

    /// Puts the machine in `Error`, cancelling any payment race.
    pub async fn fault(&self, reason: &str) -> Result<()> {
        self.cancel_payment();
        let mut fsm = self.fsm.lock().await;
        fsm.fault(reason).await?;
        tracing::error!(reason, "Machine faulted");
        self.notifier.publish(Notification::Fault {
            reason: reason.to_string(),
            owner_contact: self.catalog.owner_contact().map(str::to_string),
        });
        self.publish_state(&fsm);
        Ok(())
    }

    pub async fn recover(&self) -> Result<()> {
        self.touch();
        let mut fsm = self.fsm.lock().await;
        fsm.recover().await?;
        self.publish_state(&fsm);
        Ok(())
    }

    /// Cancels the payment race in flight, if any. Returns whether one was.
    pub fn cancel_payment(&self) -> bool {
        let active = self
            .active_race
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match active.as_ref() {
            Some(token) => {
                tracing::info!("Cancelling payment race");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn payment_in_flight(&self) -> bool {
        self.active_race
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Refunds and ends an interaction that has seen no activity for the
    /// configured idle timeout. Returns the refunded amount when it did.
    pub async fn expire_idle(&self) -> Result<Option<i64>> {
        let Some(timeout) = self.config.idle_timeout() else {
            return Ok(None);
        };
        if self.payment_in_flight() || self.idle_for() < timeout {
            return Ok(None);
        }

        let mut fsm = self.fsm.lock().await;
        if fsm.state() != TransactionState::Interacting {
            return Ok(None);
        }
        let refunded = fsm.abandon().await?;
        tracing::info!(refunded, idle_ms = timeout.as_millis() as u64, "Interaction abandoned");
        if refunded > 0 {
            self.notifier
                .publish(Notification::Refunded { amount: refunded });
        }
        self.publish_state(&fsm);
        Ok(Some(refunded))
    }

    /// Checks for abandoned interactions until `shutdown` is cancelled.
    pub fn spawn_idle_watchdog(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let machine = Arc::clone(self);
        let period = self.config.idle_check_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = machine.expire_idle().await {
                            tracing::warn!(error = %e, "Idle check failed");
                        }
                    }
                }
            }
            tracing::debug!("Idle watchdog stopped");
        })
    }

    async fn run_race(&self, amount: i64) -> RaceReport {
        let token = CancellationToken::new();
        *self
            .active_race
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(token.clone());

        let report = self.race.run(amount, &self.gateways, &token).await;

        *self
            .active_race
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.touch();
        report
    }

    /// Records how a race for `shortfall` on `sku` ended.
    ///
    /// Every captured payment is credited before anything else, whatever the
    /// machine did while the lock was released. Dispensing only follows when
    /// the machine is still interacting over the same product.
    async fn settle_race(
        &self,
        fsm: &mut TransactionFsm,
        sku: &str,
        shortfall: i64,
        report: RaceReport,
    ) -> Result<()> {
        for failure in report.failures() {
            let reason = match &failure.outcome {
                GatewayOutcome::Failed(reason) => reason.as_str(),
                _ => "timeout",
            };
            fsm.record_gateway_failure(&failure.gateway_id, reason).await?;
        }
        let report = match report.into_result() {
            Ok(report) => report,
            Err(VendError::AllGatewaysFailed { attempted }) => {
                self.notifier.publish(Notification::PaymentFailed { attempted });
                let product = self.selected_product(fsm)?;
                let required = fsm.machine().escrow.shortfall(product.price_minor_units);
                return Err(self.insufficient(product, required));
            }
            Err(e) => return Err(e),
        };

        for payment in report.captured() {
            let balance = match fsm
                .credit_gateway_payment(&payment.gateway_id, shortfall)
                .await
            {
                Ok(balance) => balance,
                Err(e) => {
                    tracing::error!(
                        gateway = %payment.gateway_id,
                        amount = shortfall,
                        error = %e,
                        "Captured gateway payment could not be credited"
                    );
                    return Err(e);
                }
            };
            self.notifier.publish(Notification::DepositConfirmed {
                amount: shortfall,
                balance,
                source: PaymentSource::Gateway(payment.gateway_id.clone()),
            });
        }
        let late = report.late_successes().count();
        if late > 0 {
            tracing::warn!(late, amount = shortfall, "Extra gateway payments kept as credit");
        }

        let product = match self.selected_product(fsm) {
            Ok(product) if product.sku == sku => product,
            _ => {
                tracing::warn!(
                    sku,
                    state = %fsm.state(),
                    escrow = fsm.escrow(),
                    "Machine moved on during payment, credit kept in escrow"
                );
                self.publish_state(fsm);
                return Err(VendError::InvalidTransition {
                    from: fsm.state(),
                    trigger: Trigger::Dispense,
                });
            }
        };
        let required = fsm.machine().escrow.shortfall(product.price_minor_units);
        if required > 0 {
            return Err(self.insufficient(product, required));
        }
        self.dispense(fsm, product).await
    }

    async fn dispense(&self, fsm: &mut TransactionFsm, product: &Product) -> Result<()> {
        if let Err(e) = fsm.dispense(product).await {
            if matches!(e, VendError::SoldOut(_)) {
                self.notifier.publish(Notification::SoldOut {
                    sku: product.sku.clone(),
                });
            }
            return Err(e);
        }
        self.publish_state(fsm);
        Ok(())
    }

    fn insufficient(&self, product: &Product, required: i64) -> VendError {
        self.notifier.publish(Notification::InsufficientFunds {
            sku: product.sku.clone(),
            required,
        });
        VendError::InsufficientFunds { required }
    }

    fn product(&self, sku: &str) -> Result<&Product> {
        self.catalog
            .get(sku)
            .ok_or_else(|| VendError::UnknownProduct(sku.to_string()))
    }

    /// The product picked in the current interaction.
    fn selected_product(&self, fsm: &TransactionFsm) -> Result<&Product> {
        match fsm.selected_sku() {
            Some(sku) if fsm.state() == TransactionState::Interacting => self.product(sku),
            _ => Err(VendError::InvalidTransition {
                from: fsm.state(),
                trigger: Trigger::Dispense,
            }),
        }
    }

    fn sold_out(fsm: &TransactionFsm, product: &Product) -> bool {
        product.tracks_inventory && fsm.machine().inventory_of(&product.sku).unwrap_or(0) <= 0
    }

    fn publish_state(&self, fsm: &TransactionFsm) {
        self.notifier.publish(Notification::StateChanged {
            state: fsm.state(),
            selected_sku: fsm.selected_sku().map(str::to_string),
            escrow: fsm.escrow(),
        });
    }

    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> std::time::Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }
}
