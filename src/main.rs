use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use vendcore::application::orchestrator::Orchestrator;
use vendcore::config::MachineConfig;
use vendcore::domain::ports::{EventStoreBox, GatewayAdapterRef};
use vendcore::infrastructure::file_store::FileEventStore;
use vendcore::infrastructure::in_memory::InMemoryEventStore;
use vendcore::infrastructure::simulated_gateway::SimulatedGateway;
use vendcore::interfaces::csv::catalog_reader::CatalogReader;
use vendcore::interfaces::csv::session_reader::SessionReader;
use vendcore::interfaces::csv::status_writer::StatusWriter;
use vendcore::logging::init_logging;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Session commands CSV file (action, sku, amount)
    session: PathBuf,

    /// Product catalog CSV file (sku, name, price, inventory, tracks_inventory)
    #[arg(long)]
    catalog: PathBuf,

    /// Directory for the event log and snapshot. In-memory if omitted.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// JSON machine configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Simulated virtual gateway, e.g. `stripe=pending,success` or `paypal=fail`
    #[arg(long = "gateway")]
    gateways: Vec<String>,

    /// Owner contact shown on fault notices
    #[arg(long)]
    owner: Option<String>,

    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_json);

    let config = match &cli.config {
        Some(path) => MachineConfig::from_json_file(path).into_diagnostic()?,
        None => MachineConfig::default(),
    };

    let file = File::open(&cli.catalog).into_diagnostic()?;
    let mut catalog = CatalogReader::new(file).into_catalog().into_diagnostic()?;
    if let Some(owner) = cli.owner {
        catalog = catalog.with_owner_contact(owner);
    }

    let store: EventStoreBox = match &cli.data_dir {
        Some(dir) => Box::new(
            FileEventStore::open(dir, config.snapshot_threshold)
                .await
                .into_diagnostic()?,
        ),
        None => Box::new(InMemoryEventStore::with_snapshot_threshold(
            config.snapshot_threshold,
        )),
    };
    let gateways = cli
        .gateways
        .iter()
        .map(|spec| {
            spec.parse::<SimulatedGateway>()
                .map(|gateway| Arc::new(gateway) as GatewayAdapterRef)
        })
        .collect::<vendcore::error::Result<Vec<_>>>()
        .into_diagnostic()?;

    let orchestrator = Orchestrator::start(catalog, store, gateways, config)
        .await
        .into_diagnostic()?;

    let file = File::open(&cli.session).into_diagnostic()?;
    let reader = SessionReader::new(file);
    for command in reader.commands() {
        match command {
            Ok(command) => {
                if let Err(e) = command.execute(&orchestrator).await {
                    eprintln!("Error processing command: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }

    let status = orchestrator.status().await;
    let stdout = io::stdout();
    let mut writer = StatusWriter::new(stdout.lock());
    writer
        .write_status(&status, orchestrator.catalog())
        .into_diagnostic()?;

    Ok(())
}
