#![allow(dead_code)]

use std::io::{Error, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use vendcore::application::orchestrator::Orchestrator;
use vendcore::config::MachineConfig;
use vendcore::domain::ports::{EventStoreBox, GatewayAdapterRef};
use vendcore::domain::product::{Catalog, Product};

/// A: tracked, 5 in stock. B: untracked. C: tracked, sold out.
pub fn catalog() -> Catalog {
    Catalog::new(vec![
        Product::new("A", 125).named("Cola").tracked(5),
        Product::new("B", 150).named("Chips"),
        Product::new("C", 50).named("Gum").tracked(0),
    ])
    .with_owner_contact("owner@example.com")
}

pub fn fast_config() -> MachineConfig {
    MachineConfig {
        poll_interval_ms: 5,
        ..MachineConfig::default()
    }
}

pub async fn start(store: EventStoreBox, gateways: Vec<GatewayAdapterRef>) -> Orchestrator {
    start_with(store, gateways, fast_config()).await
}

pub async fn start_with(
    store: EventStoreBox,
    gateways: Vec<GatewayAdapterRef>,
    config: MachineConfig,
) -> Orchestrator {
    Orchestrator::start(catalog(), store, gateways, config)
        .await
        .unwrap()
}

/// Writes a session CSV with the given `(action, sku, amount)` rows.
pub fn session(rows: &[(&str, &str, &str)]) -> Result<NamedTempFile, Error> {
    let file = NamedTempFile::new()?;
    let mut wtr = csv::WriterBuilder::new().from_path(file.path())?;
    wtr.write_record(["action", "sku", "amount"])?;
    for (action, sku, amount) in rows {
        wtr.write_record([action, sku, amount])?;
    }
    wtr.flush()?;
    Ok(file)
}

pub fn write_config(path: &Path, json: &str) -> Result<(), Error> {
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "{json}")
}
