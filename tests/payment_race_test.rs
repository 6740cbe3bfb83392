use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;
use vendcore::application::notifications::Notification;
use vendcore::application::race::{GatewayOutcome, PaymentRace, RaceConfig};
use vendcore::domain::event::{DomainEvent, EventKind, PaymentSource};
use vendcore::domain::ports::{EventStore, GatewayAdapter, GatewayAdapterRef, PaymentStatus};
use vendcore::domain::state::TransactionState;
use vendcore::error::VendError;
use vendcore::infrastructure::in_memory::InMemoryEventStore;
use vendcore::infrastructure::simulated_gateway::SimulatedGateway;

mod common;

fn config(poll_ms: u64, max_attempts: u32) -> RaceConfig {
    RaceConfig {
        poll_interval: Duration::from_millis(poll_ms),
        max_attempts,
    }
}

/// Reports success only once every gateway sharing the barrier has been
/// polled, so they all confirm on the same tick.
struct LockstepGateway {
    id: String,
    barrier: Arc<Barrier>,
}

#[async_trait]
impl GatewayAdapter for LockstepGateway {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate_payment_request(&self, amount: i64) -> vendcore::error::Result<String> {
        Ok(format!("https://{}.example.com/pay?amount={amount}", self.id))
    }

    async fn poll_status(&self, _reference: &str) -> vendcore::error::Result<PaymentStatus> {
        self.barrier.wait().await;
        Ok(PaymentStatus::Success)
    }
}

fn lockstep(ids: &[&str]) -> Vec<GatewayAdapterRef> {
    let barrier = Arc::new(Barrier::new(ids.len()));
    ids.iter()
        .map(|id| {
            Arc::new(LockstepGateway {
                id: id.to_string(),
                barrier: Arc::clone(&barrier),
            }) as GatewayAdapterRef
        })
        .collect()
}

#[tokio::test]
async fn test_single_winner_cancels_the_rest() {
    let a = Arc::new(SimulatedGateway::pending("A"));
    let b = Arc::new(SimulatedGateway::succeeds_after("B", 2));
    let c = Arc::new(SimulatedGateway::pending("C"));
    let gateways: Vec<GatewayAdapterRef> = vec![a.clone(), b.clone(), c.clone()];

    let report = PaymentRace::new(config(10, 10))
        .start(125, &gateways)
        .await
        .unwrap();

    assert_eq!(report.winner().unwrap().gateway_id, "B");
    assert_eq!(report.results.len(), 3);
    assert_eq!(report.cancelled_count(), 2);

    // No polling task outlives the race.
    drop(gateways);
    assert_eq!(Arc::strong_count(&a), 1);
    assert_eq!(Arc::strong_count(&b), 1);
    assert_eq!(Arc::strong_count(&c), 1);

    // Losers stopped polling once B won.
    let polls_after_race = a.polls();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(a.polls(), polls_after_race);
}

#[tokio::test]
async fn test_simultaneous_successes_are_all_reported() {
    let gateways = lockstep(&["A", "B"]);
    let report = PaymentRace::new(config(5, 3))
        .start(100, &gateways)
        .await
        .unwrap();

    assert!(report.winner().is_some());
    assert_eq!(report.late_successes().count(), 1);
    assert_eq!(report.captured().count(), 2);
    assert_eq!(report.cancelled_count(), 0);
    assert_eq!(report.failures().count(), 0);
}

#[tokio::test]
async fn test_zero_gateways() {
    let err = PaymentRace::new(config(10, 10))
        .start(125, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, VendError::AllGatewaysFailed { attempted: 0 }));
}

#[tokio::test]
async fn test_every_gateway_failing() {
    let gateways: Vec<GatewayAdapterRef> = vec![
        Arc::new(SimulatedGateway::times_out("A")),
        Arc::new(SimulatedGateway::failing("B", "offline")),
        Arc::new(SimulatedGateway::pending("C")),
    ];
    let report = PaymentRace::new(config(1, 3))
        .run(125, &gateways, &CancellationToken::new())
        .await;

    assert!(report.winner().is_none());
    assert_eq!(report.failures().count(), 3);
    assert!(report
        .results
        .iter()
        .any(|r| r.outcome == GatewayOutcome::Failed("gateway B failed: offline".into())));
    assert!(matches!(
        report.into_result(),
        Err(VendError::AllGatewaysFailed { attempted: 3 })
    ));
}

#[tokio::test]
async fn test_external_cancellation() {
    let gateways: Vec<GatewayAdapterRef> = vec![
        Arc::new(SimulatedGateway::pending("A")),
        Arc::new(SimulatedGateway::pending("B")),
    ];
    let deadline = CancellationToken::new();
    let canceller = deadline.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        canceller.cancel();
    });

    let report = PaymentRace::new(config(10, 1000))
        .run(125, &gateways, &deadline)
        .await;

    assert_eq!(report.cancelled_count(), 2);
    assert!(matches!(
        report.into_result(),
        Err(VendError::PaymentCancelled)
    ));
}

#[tokio::test]
async fn test_orchestrator_deposits_shortfall_and_dispenses() {
    let store = InMemoryEventStore::new();
    let gateways: Vec<GatewayAdapterRef> = vec![
        Arc::new(SimulatedGateway::pending("A")),
        Arc::new(SimulatedGateway::succeeds_after("B", 2)),
        Arc::new(SimulatedGateway::failing("C", "offline")),
    ];
    let machine = common::start(Box::new(store.clone()), gateways).await;

    machine.deposit(25).await.unwrap();
    machine.select_product("A").await.unwrap();
    machine.process_payment().await.unwrap();

    let state = machine.machine_state().await;
    assert_eq!(state.state, TransactionState::Dispensing);
    assert_eq!(state.escrow.balance(), 0);
    assert_eq!(
        state.last_payment_source,
        Some(PaymentSource::Gateway("B".into()))
    );
    assert_eq!(store.replay(EventKind::GatewaySucceeded).await.unwrap().len(), 1);
    assert_eq!(store.replay(EventKind::GatewayFailed).await.unwrap().len(), 1);

    assert_eq!(
        machine.finish_dispensing().await.unwrap(),
        TransactionState::Idle
    );
}

#[tokio::test]
async fn test_orchestrator_credits_every_captured_payment() {
    let store = InMemoryEventStore::new();
    let machine = common::start(Box::new(store.clone()), lockstep(&["A", "B"])).await;
    let mut rx = machine.subscribe();

    machine.deposit(25).await.unwrap();
    machine.select_product("A").await.unwrap();
    machine.process_payment().await.unwrap();

    // Both gateways captured the 100 shortfall; the extra payment is credit.
    let status = machine.status().await;
    assert_eq!(status.state, TransactionState::Dispensing);
    assert_eq!(status.escrow, 100);
    assert_eq!(store.replay(EventKind::GatewaySucceeded).await.unwrap().len(), 2);
    let gateway_deposits = store
        .replay(EventKind::Deposited)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| {
            matches!(
                &r.event,
                DomainEvent::Deposited { amount: 100, source: PaymentSource::Gateway(_) }
            )
        })
        .count();
    assert_eq!(gateway_deposits, 2);

    let mut confirmed = 0;
    while let Ok(notification) = rx.try_recv() {
        if let Notification::DepositConfirmed {
            source: PaymentSource::Gateway(_),
            ..
        } = notification
        {
            confirmed += 1;
        }
    }
    assert_eq!(confirmed, 2);

    assert_eq!(
        machine.finish_dispensing().await.unwrap(),
        TransactionState::Interacting
    );
    assert_eq!(machine.request_refund().await.unwrap(), 100);
}

#[tokio::test]
async fn test_machine_stays_responsive_and_cancellable_during_race() {
    let gateways: Vec<GatewayAdapterRef> = vec![Arc::new(SimulatedGateway::pending("A"))];
    let machine = Arc::new(
        common::start_with(
            Box::new(InMemoryEventStore::new()),
            gateways,
            vendcore::config::MachineConfig {
                poll_interval_ms: 10,
                max_poll_attempts: 1000,
                ..common::fast_config()
            },
        )
        .await,
    );
    machine.deposit(50).await.unwrap();
    machine.select_product("A").await.unwrap();

    let paying = {
        let machine = Arc::clone(&machine);
        tokio::spawn(async move { machine.process_payment().await })
    };
    while !machine.payment_in_flight() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let status = machine.status().await;
    assert_eq!(status.state, TransactionState::Interacting);
    assert_eq!(status.escrow, 50);

    assert!(machine.cancel_payment());
    let result = paying.await.unwrap();
    assert!(matches!(result, Err(VendError::PaymentCancelled)));
    assert!(!machine.payment_in_flight());
    assert_eq!(machine.status().await.escrow, 50);
}
