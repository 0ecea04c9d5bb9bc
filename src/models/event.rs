//! Typed domain events decoded from reward-pool program activity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Event severity, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Closed set of domain event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    RewardPoolInitialized,
    TaskCompletionRecorded,
    RewardsWithdrawn,
    PoolPaused,
    PoolUnpaused,
    PlatformFeeUpdated,
    RewardVaultCreated,
    BalanceLow,
    HighVolume,
    SuspiciousActivity,
    ContractError,
    TransactionFailed,
    NetworkError,
}

impl EventKind {
    /// Error-bearing kinds feed the error-rate calculation.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            EventKind::ContractError | EventKind::TransactionFailed | EventKind::NetworkError
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::RewardPoolInitialized => "reward-pool-initialized",
            EventKind::TaskCompletionRecorded => "task-completion-recorded",
            EventKind::RewardsWithdrawn => "rewards-withdrawn",
            EventKind::PoolPaused => "pool-paused",
            EventKind::PoolUnpaused => "pool-unpaused",
            EventKind::PlatformFeeUpdated => "platform-fee-updated",
            EventKind::RewardVaultCreated => "reward-vault-created",
            EventKind::BalanceLow => "balance-low",
            EventKind::HighVolume => "high-volume",
            EventKind::SuspiciousActivity => "suspicious-activity",
            EventKind::ContractError => "contract-error",
            EventKind::TransactionFailed => "transaction-failed",
            EventKind::NetworkError => "network-error",
        };
        write!(f, "{}", s)
    }
}

/// A decoded domain event. Immutable once emitted by the decoder;
/// downstream stages never mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramEvent {
    pub id: String,
    pub kind: EventKind,
    pub signature: String,
    pub slot: u64,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_mint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl ProgramEvent {
    pub fn new(kind: EventKind, signature: impl Into<String>, slot: u64, severity: Severity) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            signature: signature.into(),
            slot,
            timestamp: Utc::now(),
            severity,
            address: None,
            pool_id: None,
            token_mint: None,
            task_id: None,
            amount: None,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Closed field accessor used by rule conditions. Named attributes
    /// resolve first; anything else falls back to the metadata map.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "amount" => self.amount.map(|a| {
                serde_json::Number::from_f64(a)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }),
            "address" => self.address.clone().map(Value::String),
            "poolId" => self.pool_id.clone().map(Value::String),
            "tokenMint" => self.token_mint.clone().map(Value::String),
            "taskId" => self.task_id.clone().map(Value::String),
            "error" => self.error.clone().map(Value::String),
            other => self.metadata.get(other).cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_error_kinds() {
        assert!(EventKind::ContractError.is_error());
        assert!(EventKind::TransactionFailed.is_error());
        assert!(EventKind::NetworkError.is_error());
        assert!(!EventKind::RewardsWithdrawn.is_error());
    }

    #[test]
    fn test_field_accessor_named_and_fallback() {
        let mut event = ProgramEvent::new(EventKind::RewardsWithdrawn, "sig", 10, Severity::Medium);
        event.amount = Some(150.0);
        event.address = Some("farmer1".to_string());
        event
            .metadata
            .insert("nonce".to_string(), Value::from(4u64));

        assert_eq!(event.field("amount"), Some(Value::from(150.0)));
        assert_eq!(event.field("address"), Some(Value::from("farmer1")));
        assert_eq!(event.field("nonce"), Some(Value::from(4u64)));
        assert_eq!(event.field("missing"), None);
    }
}
