//! Domain model: money, the transaction state table, events and the state
//! they fold into, plus the ports the application layer depends on.

pub mod event;
pub mod machine;
pub mod money;
pub mod ports;
pub mod product;
pub mod state;
