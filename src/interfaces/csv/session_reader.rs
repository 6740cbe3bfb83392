use crate::application::orchestrator::Orchestrator;
use crate::error::{Result, VendError};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Action {
    Deposit,
    Select,
    Pay,
    Finish,
    Vend,
    Refund,
    Fault,
    Recover,
}

#[derive(Debug, Deserialize)]
struct CommandRow {
    action: Action,
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    amount: Option<i64>,
}

/// One line of a customer/operator session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Deposit(i64),
    Select(String),
    Pay,
    Finish,
    Vend(String),
    Refund,
    /// The `sku` column carries the reason.
    Fault(String),
    Recover,
}

impl TryFrom<CommandRow> for SessionCommand {
    type Error = VendError;

    fn try_from(row: CommandRow) -> Result<Self> {
        let sku = || {
            row.sku
                .clone()
                .ok_or_else(|| VendError::InvalidCommand(format!("{:?} needs a sku", row.action)))
        };
        Ok(match row.action {
            Action::Deposit => SessionCommand::Deposit(row.amount.ok_or_else(|| {
                VendError::InvalidCommand("deposit needs an amount".into())
            })?),
            Action::Select => SessionCommand::Select(sku()?),
            Action::Pay => SessionCommand::Pay,
            Action::Finish => SessionCommand::Finish,
            Action::Vend => SessionCommand::Vend(sku()?),
            Action::Refund => SessionCommand::Refund,
            Action::Fault => {
                SessionCommand::Fault(row.sku.clone().unwrap_or_else(|| "operator fault".into()))
            }
            Action::Recover => SessionCommand::Recover,
        })
    }
}

impl SessionCommand {
    /// Runs the command against the machine.
    pub async fn execute(self, orchestrator: &Orchestrator) -> Result<()> {
        match self {
            SessionCommand::Deposit(amount) => orchestrator.deposit(amount).await.map(|_| ()),
            SessionCommand::Select(sku) => orchestrator.select_product(&sku).await,
            SessionCommand::Pay => orchestrator.process_payment().await,
            SessionCommand::Finish => orchestrator.finish_dispensing().await.map(|_| ()),
            SessionCommand::Vend(sku) => orchestrator.vend(&sku).await.map(|_| ()),
            SessionCommand::Refund => orchestrator.request_refund().await.map(|_| ()),
            SessionCommand::Fault(reason) => orchestrator.fault(&reason).await,
            SessionCommand::Recover => orchestrator.recover().await,
        }
    }
}

/// Reads session commands from a CSV source with columns `action, sku, amount`.
pub struct SessionReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> SessionReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads commands; a bad row yields an error and reading goes on.
    pub fn commands(self) -> impl Iterator<Item = Result<SessionCommand>> {
        self.reader.into_deserialize::<CommandRow>().map(|result| {
            result
                .map_err(VendError::from)
                .and_then(SessionCommand::try_from)
        })
    }
}
