//! Application layer: the transaction state machine, the payment race, state
//! recovery and the orchestrator that ties them to the catalog.
//!
//! The `Orchestrator` is the entry point. It serialises every mutation through
//! one `tokio` mutex around the `TransactionFsm`, which is the only writer of
//! the event store.

pub mod fsm;
pub mod notifications;
pub mod orchestrator;
pub mod race;
pub mod recovery;
