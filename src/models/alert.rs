//! In-flight alert envelopes. Never persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use super::event::{ProgramEvent, Severity};

/// Channel-agnostic alert payload built before channel-specific
/// formatting.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertEnvelope {
    /// Produced by a firing rule.
    Rule {
        rule_id: String,
        rule_name: String,
        severity: Severity,
        event: ProgramEvent,
        message: String,
        channels: Vec<String>,
    },
    /// Self-monitoring alert that bypasses rules and goes to every
    /// enabled channel.
    System {
        alert_type: String,
        severity: Severity,
        message: String,
        timestamp: DateTime<Utc>,
        #[serde(skip_serializing_if = "HashMap::is_empty")]
        metadata: HashMap<String, Value>,
    },
}

impl AlertEnvelope {
    pub fn system(
        alert_type: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        AlertEnvelope::System {
            alert_type: alert_type.into(),
            severity,
            message: message.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            AlertEnvelope::Rule { severity, .. } => *severity,
            AlertEnvelope::System { severity, .. } => *severity,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AlertEnvelope::Rule { message, .. } => message,
            AlertEnvelope::System { message, .. } => message,
        }
    }

    pub fn title(&self) -> String {
        match self {
            AlertEnvelope::Rule { rule_name, .. } => format!("Alert: {}", rule_name),
            AlertEnvelope::System { alert_type, .. } => format!("System alert: {}", alert_type),
        }
    }
}
