//! Pool Sentinel Library
//!
//! Monitoring pipeline for a Solana reward-pool program: polls the
//! ledger, decodes program activity into typed events, evaluates alert
//! rules and delivers notifications.
//! This library exposes core modules for testing.

pub mod config;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod monitor;

// Re-export commonly used types for tests
pub use config::{AppConfig, LedgerConfig, MonitorSettings};
pub use error::{AppError, AppResult};
pub use ledger::{LedgerReader, ParsedInstruction, ParsedTransaction, RpcLedgerReader};
pub use models::{
    AlertChannel, AlertEnvelope, AlertRule, ChannelConfig, ChannelKind, EventKind, ProgramEvent,
    Severity,
};
pub use monitor::{
    AlertDispatcher, ChannelSender, EventDecoder, HealthMonitor, HttpChannelSender, LedgerPoller,
    MetricsAggregator, Monitor, RuleEngine,
};
