use crate::domain::money::format_minor_units;
use crate::domain::ports::{GatewayAdapter, PaymentStatus};
use crate::error::{Result, VendError};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A gateway that replays a scripted sequence of poll statuses.
///
/// The n-th poll returns the n-th scripted status; once the script runs out
/// the last status repeats. An empty script stays pending forever.
#[derive(Debug)]
pub struct SimulatedGateway {
    id: String,
    script: Vec<PaymentStatus>,
    request_error: Option<String>,
    polls: AtomicUsize,
}

impl SimulatedGateway {
    pub fn new(id: impl Into<String>, script: Vec<PaymentStatus>) -> Self {
        Self {
            id: id.into(),
            script,
            request_error: None,
            polls: AtomicUsize::new(0),
        }
    }

    pub fn pending(id: impl Into<String>) -> Self {
        Self::new(id, Vec::new())
    }

    /// Reports success on poll number `polls` (1-based).
    pub fn succeeds_after(id: impl Into<String>, polls: usize) -> Self {
        let mut script = vec![PaymentStatus::Pending; polls.saturating_sub(1)];
        script.push(PaymentStatus::Success);
        Self::new(id, script)
    }

    pub fn times_out(id: impl Into<String>) -> Self {
        Self::new(id, vec![PaymentStatus::Timeout])
    }

    /// A gateway whose payment requests are rejected outright.
    pub fn failing(id: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut gateway = Self::pending(id);
        gateway.request_error = Some(reason.into());
        gateway
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GatewayAdapter for SimulatedGateway {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate_payment_request(&self, amount: i64) -> Result<String> {
        if let Some(reason) = &self.request_error {
            return Err(VendError::GatewayFailed {
                gateway_id: self.id.clone(),
                reason: reason.clone(),
            });
        }
        let amount = format_minor_units(amount);
        Ok(format!(
            "https://{}.example.com/pay?amount={}",
            self.id,
            amount.trim_start_matches('$')
        ))
    }

    async fn poll_status(&self, _reference: &str) -> Result<PaymentStatus> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .script
            .get(n)
            .or_else(|| self.script.last())
            .copied()
            .unwrap_or(PaymentStatus::Pending))
    }
}

/// Parses `id=status,status,...`, e.g. `stripe=pending,pending,success`.
/// `id=fail` makes payment requests fail.
impl FromStr for SimulatedGateway {
    type Err = VendError;

    fn from_str(s: &str) -> Result<Self> {
        let (id, script) = s
            .split_once('=')
            .ok_or_else(|| VendError::Config(format!("expected id=statuses, got '{s}'")))?;
        let id = id.trim();
        if id.is_empty() {
            return Err(VendError::Config(format!("missing gateway id in '{s}'")));
        }
        if script.trim() == "fail" {
            return Ok(Self::failing(id, "request rejected"));
        }
        let statuses = script
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|status| match status {
                "pending" => Ok(PaymentStatus::Pending),
                "success" => Ok(PaymentStatus::Success),
                "timeout" => Ok(PaymentStatus::Timeout),
                other => Err(VendError::Config(format!("unknown gateway status '{other}'"))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(id, statuses))
    }
}
