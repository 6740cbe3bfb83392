use crate::application::race::RaceConfig;
use crate::error::{Result, VendError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Runtime tuning for one machine.
///
/// Every field has a default, so a JSON file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    /// Events appended since the last snapshot before a new one is written.
    pub snapshot_threshold: usize,
    /// `None` disables the abandoned-interaction refund.
    pub idle_timeout_ms: Option<u64>,
    pub notification_capacity: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_poll_attempts: 10,
            snapshot_threshold: 100,
            idle_timeout_ms: Some(120_000),
            notification_capacity: 64,
        }
    }
}

impl MachineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| VendError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| VendError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(VendError::Config("poll_interval_ms must be positive".into()));
        }
        if self.max_poll_attempts == 0 {
            return Err(VendError::Config("max_poll_attempts must be positive".into()));
        }
        if self.notification_capacity == 0 {
            return Err(VendError::Config(
                "notification_capacity must be positive".into(),
            ));
        }
        if self.idle_timeout_ms == Some(0) {
            return Err(VendError::Config(
                "idle_timeout_ms must be positive (omit it to disable)".into(),
            ));
        }
        Ok(())
    }

    pub fn race_config(&self) -> RaceConfig {
        RaceConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_poll_attempts,
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    /// How often the idle watchdog looks at the machine.
    pub fn idle_check_interval(&self) -> Duration {
        self.idle_timeout()
            .map(|timeout| (timeout / 4).clamp(Duration::from_millis(10), Duration::from_secs(1)))
            .unwrap_or(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = MachineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.race_config(), RaceConfig::default());
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.idle_check_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"poll_interval_ms": 50, "idle_timeout_ms": null}}"#).unwrap();

        let config = MachineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.max_poll_attempts, 10);
        assert_eq!(config.idle_timeout(), None);
    }

    #[test]
    fn test_rejects_zero_values() {
        let config = MachineConfig {
            max_poll_attempts: 0,
            ..MachineConfig::default()
        };
        assert!(matches!(config.validate(), Err(VendError::Config(_))));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"poll_interval_ms": 0}}"#).unwrap();
        assert!(MachineConfig::from_json_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_is_a_config_error() {
        assert!(matches!(
            MachineConfig::from_json_file("/definitely/not/here.json"),
            Err(VendError::Config(_))
        ));
    }
}
