//! Alert rule definitions evaluated against decoded events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::event::{EventKind, Severity};

/// Comparison operators supported by field conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    NotContains,
    Regex,
}

/// A single field condition: `field <op> value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Value,
}

/// Trailing-window rate limit for a rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimit {
    /// Maximum qualifying events inside the window before the rule is
    /// suppressed.
    pub max_events: usize,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

/// A configured alerting rule.
///
/// `last_triggered` is the only mutable piece and is written solely by
/// the rule engine when the rule fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Severity stamped on alerts this rule produces.
    pub severity: Severity,
    /// Minimum event severity required for the rule to fire, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<Severity>,
    /// Event kinds this rule applies to; `None` matches every kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_kinds: Option<Vec<EventKind>>,
    /// All conditions must hold for the rule to fire; empty means
    /// unconditional.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<FieldCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
    /// Derived-metric name -> threshold; breaches surface as system alerts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<HashMap<String, f64>>,
    /// Names of the channels alerts are routed to.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Minimum time between firings, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl AlertRule {
    pub fn new(id: impl Into<String>, name: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            severity,
            min_severity: None,
            event_kinds: None,
            conditions: Vec::new(),
            rate_limit: None,
            thresholds: None,
            channels: Vec::new(),
            cooldown_ms: None,
            last_triggered: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_deserializes_with_defaults() {
        let rule: AlertRule = serde_json::from_value(serde_json::json!({
            "id": "r1",
            "name": "large withdrawal",
            "severity": "high",
            "event_kinds": ["rewards-withdrawn"],
            "conditions": [{"field": "amount", "operator": "greater_than", "value": 100}],
            "channels": ["ops-discord"]
        }))
        .unwrap();

        assert!(rule.enabled);
        assert!(rule.cooldown_ms.is_none());
        assert_eq!(rule.channels, vec!["ops-discord"]);
        assert_eq!(rule.conditions[0].operator, ConditionOperator::GreaterThan);
    }
}
