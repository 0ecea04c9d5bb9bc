//! Configuration management.
//!
//! Loads configuration from YAML files and environment variables.
//! Environment variables (SENTINEL_*) override YAML values.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::models::{AlertChannel, AlertRule};

/// Hard floor for the poll interval.
pub const MIN_POLL_INTERVAL_MS: u64 = 1_000;
/// Hard floor for the health-check interval.
pub const MIN_HEALTH_INTERVAL_MS: u64 = 5_000;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP status surface.
    #[serde(default)]
    pub server: ServerConfig,
    /// Ledger/RPC access.
    pub ledger: LedgerConfig,
    /// Pipeline tuning.
    #[serde(default)]
    pub monitor: MonitorSettings,
    /// Configured rules and channels.
    #[serde(default)]
    pub alerting: AlertingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Ledger endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// RPC endpoint URL.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Commitment level: processed, confirmed, finalized.
    #[serde(default = "default_commitment")]
    pub commitment: String,
    /// Watched program identifier.
    pub program_id: String,
    /// Retries for transient RPC failures.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Delay between retries in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_rpc_url() -> String {
    "https://api.mainnet-beta.solana.com".to_string()
}

fn default_commitment() -> String {
    "confirmed".to_string()
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

/// Pipeline tuning knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSettings {
    /// Poll interval in milliseconds; floored at 1000.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Health-check interval in milliseconds; floored at 5000.
    #[serde(default = "default_health_interval_ms")]
    pub health_check_interval_ms: u64,
    /// Metrics recompute interval in milliseconds.
    #[serde(default = "default_metrics_interval_ms")]
    pub metrics_interval_ms: u64,
    /// Recently-seen signature set capacity.
    #[serde(default = "default_signature_cache_capacity")]
    pub signature_cache_capacity: usize,
    /// Signatures fetched per poll pass.
    #[serde(default = "default_signature_fetch_limit")]
    pub signature_fetch_limit: usize,
    /// Rolling event buffer capacity.
    #[serde(default = "default_event_buffer_capacity")]
    pub event_buffer_capacity: usize,
    /// Enable pre/post balance comparison events.
    #[serde(default = "default_true")]
    pub balance_monitoring: bool,
    /// Enable suspicious-activity detection on failed transactions.
    #[serde(default = "default_true")]
    pub suspicious_activity_detection: bool,
    /// Accepted for config compatibility; this build is polling-only.
    #[serde(default)]
    pub websocket_mode: bool,
    /// Post-balance (lamports) below this emits balance-low.
    #[serde(default = "default_low_balance_threshold")]
    pub low_balance_threshold: u64,
    /// Absolute balance delta (lamports) above this emits high-volume.
    #[serde(default = "default_high_volume_threshold")]
    pub high_volume_threshold: u64,
    /// Consecutive check failures before a warn escalates to fail.
    #[serde(default = "default_failure_escalation_threshold")]
    pub failure_escalation_threshold: u32,
    /// Sampling window for the slot-progression health check, ms.
    #[serde(default = "default_slot_sample_ms")]
    pub slot_sample_window_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_health_interval_ms() -> u64 {
    30_000
}

fn default_metrics_interval_ms() -> u64 {
    60_000
}

fn default_signature_cache_capacity() -> usize {
    1_000
}

fn default_signature_fetch_limit() -> usize {
    100
}

fn default_event_buffer_capacity() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_low_balance_threshold() -> u64 {
    100_000_000 // 0.1 SOL
}

fn default_high_volume_threshold() -> u64 {
    10_000_000_000 // 10 SOL
}

fn default_failure_escalation_threshold() -> u32 {
    3
}

fn default_slot_sample_ms() -> u64 {
    2_000
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            health_check_interval_ms: default_health_interval_ms(),
            metrics_interval_ms: default_metrics_interval_ms(),
            signature_cache_capacity: default_signature_cache_capacity(),
            signature_fetch_limit: default_signature_fetch_limit(),
            event_buffer_capacity: default_event_buffer_capacity(),
            balance_monitoring: true,
            suspicious_activity_detection: true,
            websocket_mode: false,
            low_balance_threshold: default_low_balance_threshold(),
            high_volume_threshold: default_high_volume_threshold(),
            failure_escalation_threshold: default_failure_escalation_threshold(),
            slot_sample_window_ms: default_slot_sample_ms(),
        }
    }
}

impl MonitorSettings {
    /// Poll interval with the 1000 ms floor applied.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    /// Health-check interval with the 5000 ms floor applied.
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms.max(MIN_HEALTH_INTERVAL_MS))
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }
}

/// Rules and channels loaded at startup; both are also manageable at
/// runtime through the admin endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertingConfig {
    #[serde(default)]
    pub rules: Vec<AlertRule>,
    #[serde(default)]
    pub channels: Vec<AlertChannel>,
}

impl AppConfig {
    /// Load configuration from files and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (SENTINEL_*)
    /// 2. config/sentinel.yaml (if exists)
    /// 3. sentinel.yaml (if exists)
    /// 4. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("sentinel").required(false))
            .add_source(File::with_name("config/sentinel").required(false))
            // SENTINEL_LEDGER__PROGRAM_ID=... -> ledger.program_id
            .add_source(
                Environment::with_prefix("SENTINEL")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate configuration values. Startup-time failures only; the
    /// running pipeline never crashes on bad per-event data.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.program_id.is_empty() {
            return Err(ConfigError::Message(
                "Watched program id must be set via SENTINEL_LEDGER__PROGRAM_ID".to_string(),
            ));
        }

        if self.ledger.rpc_url.is_empty() {
            return Err(ConfigError::Message("RPC URL must be set".to_string()));
        }

        for rule in &self.alerting.rules {
            for channel_name in &rule.channels {
                if !self
                    .alerting
                    .channels
                    .iter()
                    .any(|c| &c.name == channel_name)
                {
                    return Err(ConfigError::Message(format!(
                        "Rule '{}' references unknown channel '{}'",
                        rule.id, channel_name
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_floors() {
        let settings = MonitorSettings {
            poll_interval_ms: 10,
            health_check_interval_ms: 100,
            ..Default::default()
        };

        assert_eq!(settings.poll_interval(), Duration::from_millis(1_000));
        assert_eq!(settings.health_interval(), Duration::from_millis(5_000));
    }

    #[test]
    fn test_intervals_above_floor_unchanged() {
        let settings = MonitorSettings::default();
        assert_eq!(settings.poll_interval(), Duration::from_millis(5_000));
        assert_eq!(settings.health_interval(), Duration::from_millis(30_000));
    }

    #[test]
    fn test_validate_rejects_unknown_channel_reference() {
        let mut rule = crate::models::AlertRule::new("r1", "r", crate::models::Severity::Low);
        rule.channels = vec!["nope".to_string()];

        let cfg = AppConfig {
            server: ServerConfig::default(),
            ledger: LedgerConfig {
                rpc_url: default_rpc_url(),
                commitment: default_commitment(),
                program_id: "Fg6PaFpoGXkYsidMpWTK6W2BeZ7FEfcYkg476zPFsLnS".to_string(),
                retry_count: 3,
                retry_delay_ms: 500,
            },
            monitor: MonitorSettings::default(),
            alerting: AlertingConfig {
                rules: vec![rule],
                channels: vec![],
            },
        };

        assert!(cfg.validate().is_err());
    }
}
