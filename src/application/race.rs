use crate::application::notifications::{Notification, Notifier};
use crate::domain::ports::{GatewayAdapterRef, PaymentStatus};
use crate::error::{Result, VendError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Polling parameters shared by every gateway task in a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaceConfig {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    Success,
    /// The provider reported a timeout or every poll attempt came back pending.
    Timeout,
    Failed(String),
    /// Stopped because another gateway won or the race was cancelled.
    Cancelled,
    /// Confirmed after another gateway had already won. The money was
    /// captured anyway and still has to be settled.
    LateSuccess,
}

/// How one gateway task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResult {
    pub gateway_id: String,
    pub reference: Option<String>,
    pub outcome: GatewayOutcome,
}

impl GatewayResult {
    fn new(gateway_id: &str, reference: Option<String>, outcome: GatewayOutcome) -> Self {
        Self {
            gateway_id: gateway_id.to_string(),
            reference,
            outcome,
        }
    }
}

/// Every gateway's result, in completion order, once all tasks have stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RaceReport {
    winner: Option<usize>,
    pub results: Vec<GatewayResult>,
    cancelled_externally: bool,
}

impl RaceReport {
    pub fn winner(&self) -> Option<&GatewayResult> {
        self.winner.map(|idx| &self.results[idx])
    }

    pub fn cancelled_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == GatewayOutcome::Cancelled)
            .count()
    }

    /// Gateways that captured a payment after the winner.
    pub fn late_successes(&self) -> impl Iterator<Item = &GatewayResult> {
        self.results
            .iter()
            .filter(|r| r.outcome == GatewayOutcome::LateSuccess)
    }

    /// Every captured payment, the winner first.
    pub fn captured(&self) -> impl Iterator<Item = &GatewayResult> {
        self.winner().into_iter().chain(self.late_successes())
    }

    /// Results that count as a failed attempt (neither won nor were cancelled).
    pub fn failures(&self) -> impl Iterator<Item = &GatewayResult> {
        self.results.iter().filter(|r| {
            matches!(
                r.outcome,
                GatewayOutcome::Timeout | GatewayOutcome::Failed(_)
            )
        })
    }

    /// `Ok` only when some gateway won.
    pub fn into_result(self) -> Result<Self> {
        if self.winner.is_some() {
            Ok(self)
        } else if self.cancelled_externally {
            Err(VendError::PaymentCancelled)
        } else {
            Err(VendError::AllGatewaysFailed {
                attempted: self.results.len(),
            })
        }
    }
}

/// Races payment requests across several gateways.
///
/// One task per gateway is spawned into a `JoinSet`. The first task to see a
/// success cancels a shared token; the others observe it at their next await
/// point and stop. The race only returns after every task has been joined,
/// so no task outlives the call.
#[derive(Debug, Clone, Default)]
pub struct PaymentRace {
    config: RaceConfig,
    notifier: Option<Notifier>,
}

impl PaymentRace {
    pub fn new(config: RaceConfig) -> Self {
        Self {
            config,
            notifier: None,
        }
    }

    /// Publishes a `PaymentRequested` notification for each generated reference.
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> RaceConfig {
        self.config
    }

    /// Races `amount` across `gateways`; `Ok` carries the winning report.
    pub async fn start(&self, amount: i64, gateways: &[GatewayAdapterRef]) -> Result<RaceReport> {
        self.run(amount, gateways, &CancellationToken::new())
            .await
            .into_result()
    }

    /// Runs a race that also stops when `parent` is cancelled.
    ///
    /// Always returns the full report; use [`RaceReport::into_result`] to turn
    /// a race without a winner into an error.
    pub async fn run(
        &self,
        amount: i64,
        gateways: &[GatewayAdapterRef],
        parent: &CancellationToken,
    ) -> RaceReport {
        if gateways.is_empty() {
            tracing::warn!(amount, "No payment gateways configured");
            return RaceReport::default();
        }

        let token = parent.child_token();
        let mut tasks = JoinSet::new();
        let mut ids = HashMap::with_capacity(gateways.len());
        for gateway in gateways {
            let handle = tasks.spawn(poll_gateway(
                Arc::clone(gateway),
                amount,
                self.config,
                token.clone(),
                self.notifier.clone(),
            ));
            ids.insert(handle.id(), gateway.id().to_string());
        }
        tracing::info!(amount, gateways = gateways.len(), "Payment race started");

        let mut report = RaceReport::default();
        while let Some(joined) = tasks.join_next_with_id().await {
            let mut result = match joined {
                Ok((_, result)) => result,
                Err(e) => {
                    let gateway_id = ids.remove(&e.id()).unwrap_or_default();
                    tracing::error!(gateway = %gateway_id, error = %e, "Gateway task aborted");
                    GatewayResult {
                        gateway_id,
                        reference: None,
                        outcome: GatewayOutcome::Failed(e.to_string()),
                    }
                }
            };

            if result.outcome == GatewayOutcome::Success {
                if report.winner.is_none() {
                    tracing::info!(gateway = %result.gateway_id, "Payment confirmed, cancelling other gateways");
                    report.winner = Some(report.results.len());
                    token.cancel();
                } else {
                    tracing::warn!(gateway = %result.gateway_id, "Payment confirmed after the race was won");
                    result.outcome = GatewayOutcome::LateSuccess;
                }
            }
            report.results.push(result);
        }

        report.cancelled_externally = report.winner.is_none() && parent.is_cancelled();
        if report.winner.is_none() {
            tracing::warn!(
                attempted = report.results.len(),
                cancelled = report.cancelled_externally,
                "Payment race finished without a winner"
            );
        }
        report
    }
}

async fn poll_gateway(
    gateway: GatewayAdapterRef,
    amount: i64,
    config: RaceConfig,
    token: CancellationToken,
    notifier: Option<Notifier>,
) -> GatewayResult {
    let id = gateway.id().to_string();

    let requested = tokio::select! {
        biased;
        _ = token.cancelled() => return GatewayResult::new(&id, None, GatewayOutcome::Cancelled),
        requested = gateway.generate_payment_request(amount) => requested,
    };
    let reference = match requested {
        Ok(reference) => reference,
        Err(e) => {
            tracing::warn!(gateway = %id, error = %e, "Payment request failed");
            return GatewayResult::new(&id, None, GatewayOutcome::Failed(e.to_string()));
        }
    };
    if let Some(notifier) = &notifier {
        notifier.publish(Notification::PaymentRequested {
            gateway_id: id.clone(),
            reference: reference.clone(),
        });
    }

    let end = |outcome| GatewayResult::new(&id, Some(reference.clone()), outcome);
    for attempt in 1..=config.max_attempts {
        tokio::select! {
            biased;
            _ = token.cancelled() => return end(GatewayOutcome::Cancelled),
            _ = tokio::time::sleep(config.poll_interval) => {}
        }
        let status = tokio::select! {
            biased;
            _ = token.cancelled() => return end(GatewayOutcome::Cancelled),
            status = gateway.poll_status(&reference) => status,
        };
        match status {
            Ok(PaymentStatus::Success) => return end(GatewayOutcome::Success),
            Ok(PaymentStatus::Timeout) => return end(GatewayOutcome::Timeout),
            Ok(PaymentStatus::Pending) => {
                tracing::debug!(gateway = %id, attempt, "Payment still pending");
            }
            Err(e) => {
                tracing::warn!(gateway = %id, attempt, error = %e, "Polling payment status failed");
                return end(GatewayOutcome::Failed(e.to_string()));
            }
        }
    }
    tracing::info!(gateway = %id, attempts = config.max_attempts, "Payment polling exhausted");
    end(GatewayOutcome::Timeout)
}
