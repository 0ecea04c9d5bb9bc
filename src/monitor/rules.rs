//! Rule evaluation: kind filters, field conditions, rate limits and
//! cooldowns.
//!
//! Evaluation never fails: a bad regex or a type-mismatched comparison
//! counts as "condition not satisfied" and is logged, so one
//! misconfigured rule cannot take down the pipeline.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};
use crate::models::{AlertRule, ConditionOperator, FieldCondition, ProgramEvent};
use crate::monitor::aggregator::{MetricsAggregator, MetricsSnapshot};

pub struct RuleEngine {
    rules: RwLock<Vec<AlertRule>>,
    aggregator: Arc<MetricsAggregator>,
    /// Bookkeeping marker for rules whose cooldown has not yet expired.
    /// Cooldown gating itself is computed from `last_triggered`.
    in_cooldown: Arc<RwLock<HashSet<String>>>,
    shutdown: CancellationToken,
}

impl RuleEngine {
    pub fn new(rules: Vec<AlertRule>, aggregator: Arc<MetricsAggregator>) -> Self {
        Self {
            rules: RwLock::new(rules),
            aggregator,
            in_cooldown: Arc::new(RwLock::new(HashSet::new())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn add_rule(&self, rule: AlertRule) -> AppResult<()> {
        let mut rules = self.rules.write();
        if rules.iter().any(|r| r.id == rule.id) {
            return Err(AppError::Duplicate(format!("Rule '{}' already exists", rule.id)));
        }
        tracing::info!(rule_id = %rule.id, rule_name = %rule.name, "Rule registered");
        rules.push(rule);
        Ok(())
    }

    pub fn remove_rule(&self, rule_id: &str) -> AppResult<AlertRule> {
        let mut rules = self.rules.write();
        let position = rules
            .iter()
            .position(|r| r.id == rule_id)
            .ok_or_else(|| AppError::NotFound(format!("Rule '{}' not found", rule_id)))?;
        tracing::info!(rule_id, "Rule removed");
        Ok(rules.remove(position))
    }

    pub fn list_rules(&self) -> Vec<AlertRule> {
        self.rules.read().clone()
    }

    /// Evaluate the event against every registered rule and return the
    /// rules that fire. Firing updates `last_triggered`.
    pub fn evaluate(&self, event: &ProgramEvent) -> Vec<AlertRule> {
        self.evaluate_at(event, Utc::now())
    }

    pub fn evaluate_at(&self, event: &ProgramEvent, now: DateTime<Utc>) -> Vec<AlertRule> {
        let mut fired = Vec::new();
        let mut rules = self.rules.write();

        for rule in rules.iter_mut() {
            if !self.rule_matches(rule, event, now) {
                continue;
            }

            rule.last_triggered = Some(now);
            if let Some(cooldown_ms) = rule.cooldown_ms {
                self.mark_cooldown(rule.id.clone(), cooldown_ms);
            }
            tracing::info!(
                rule_id = %rule.id,
                event_kind = %event.kind,
                signature = %event.signature,
                "Rule fired"
            );
            fired.push(rule.clone());
        }

        fired
    }

    fn rule_matches(&self, rule: &AlertRule, event: &ProgramEvent, now: DateTime<Utc>) -> bool {
        if !rule.enabled {
            return false;
        }

        if let Some(kinds) = &rule.event_kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }

        if let Some(min) = rule.min_severity {
            if event.severity < min {
                return false;
            }
        }

        if !rule
            .conditions
            .iter()
            .all(|c| condition_met(event, c))
        {
            return false;
        }

        if in_cooldown(rule, now) {
            return false;
        }

        if let Some(rate_limit) = &rule.rate_limit {
            // Prior qualifying events only; the current event is not
            // yet in the buffer, so reaching the maximum suppresses
            // the firing that would exceed it.
            let prior = self.aggregator.count_in_window(
                event.kind,
                rate_limit.window_ms,
                |buffered| rule.conditions.iter().all(|c| condition_met(buffered, c)),
            );
            if prior >= rate_limit.max_events {
                tracing::debug!(
                    rule_id = %rule.id,
                    prior,
                    max = rate_limit.max_events,
                    "Rule suppressed by rate limit"
                );
                return false;
            }
        }

        true
    }

    /// Evaluate metric-threshold rules against a snapshot. Returns the
    /// breached rules with a description of each breach.
    pub fn check_thresholds(&self, snapshot: &MetricsSnapshot) -> Vec<(AlertRule, String)> {
        self.check_thresholds_at(snapshot, Utc::now())
    }

    pub fn check_thresholds_at(
        &self,
        snapshot: &MetricsSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<(AlertRule, String)> {
        let mut breached = Vec::new();
        let mut rules = self.rules.write();

        for rule in rules.iter_mut() {
            if !rule.enabled || in_cooldown(rule, now) {
                continue;
            }
            let Some(thresholds) = rule.thresholds.clone() else {
                continue;
            };

            for (metric, threshold) in &thresholds {
                let Some(value) = metric_value(snapshot, metric) else {
                    tracing::warn!(rule_id = %rule.id, metric = %metric, "Unknown threshold metric");
                    continue;
                };
                if value > *threshold {
                    rule.last_triggered = Some(now);
                    if let Some(cooldown_ms) = rule.cooldown_ms {
                        self.mark_cooldown(rule.id.clone(), cooldown_ms);
                    }
                    breached.push((
                        rule.clone(),
                        format!("{} is {:.4}, above threshold {:.4}", metric, value, threshold),
                    ));
                    break;
                }
            }
        }

        breached
    }

    /// Spawn the cooldown-expiry task. Expiry only clears the marker;
    /// it emits nothing.
    fn mark_cooldown(&self, rule_id: String, cooldown_ms: u64) {
        self.in_cooldown.write().insert(rule_id.clone());

        let marker = Arc::clone(&self.in_cooldown);
        let token = self.shutdown.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(std::time::Duration::from_millis(cooldown_ms)) => {
                    marker.write().remove(&rule_id);
                }
            }
        });
    }

    pub fn rules_in_cooldown(&self) -> usize {
        self.in_cooldown.read().len()
    }

    /// Cancel outstanding cooldown-expiry tasks.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

/// Closed set of snapshot metrics addressable from rule thresholds.
fn metric_value(snapshot: &MetricsSnapshot, name: &str) -> Option<f64> {
    match name {
        "error_rate" => Some(snapshot.error_rate),
        "success_rate" => Some(snapshot.success_rate),
        "total_events" => Some(snapshot.total_events as f64),
        "events_last_hour" => Some(snapshot.events_last_hour as f64),
        "total_volume" => Some(snapshot.total_volume),
        "average_amount" => Some(snapshot.average_amount),
        "unique_addresses" => Some(snapshot.unique_addresses as f64),
        "unique_pools" => Some(snapshot.unique_pools as f64),
        _ => None,
    }
}

fn in_cooldown(rule: &AlertRule, now: DateTime<Utc>) -> bool {
    match (rule.cooldown_ms, rule.last_triggered) {
        (Some(cooldown_ms), Some(last)) => {
            now < last + ChronoDuration::milliseconds(cooldown_ms as i64)
        }
        _ => false,
    }
}

fn condition_met(event: &ProgramEvent, condition: &FieldCondition) -> bool {
    let field_value = event.field(&condition.field);

    match condition.operator {
        ConditionOperator::Equals => field_value
            .map(|v| values_equal(&v, &condition.value))
            .unwrap_or(false),
        ConditionOperator::NotEquals => field_value
            .map(|v| !values_equal(&v, &condition.value))
            .unwrap_or(true),
        ConditionOperator::GreaterThan => numeric_pair(field_value.as_ref(), &condition.value)
            .map(|(a, b)| a > b)
            .unwrap_or(false),
        ConditionOperator::LessThan => numeric_pair(field_value.as_ref(), &condition.value)
            .map(|(a, b)| a < b)
            .unwrap_or(false),
        ConditionOperator::Contains => field_value
            .map(|v| string_form(&v).contains(&string_form(&condition.value)))
            .unwrap_or(false),
        ConditionOperator::NotContains => field_value
            .map(|v| !string_form(&v).contains(&string_form(&condition.value)))
            .unwrap_or(true),
        ConditionOperator::Regex => {
            let pattern = string_form(&condition.value);
            match Regex::new(&pattern) {
                Ok(regex) => field_value
                    .map(|v| regex.is_match(&string_form(&v)))
                    .unwrap_or(false),
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "Invalid condition regex");
                    false
                }
            }
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn numeric_pair(a: Option<&Value>, b: &Value) -> Option<(f64, f64)> {
    Some((numeric(a?)?, numeric(b)?))
}

fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventKind, RateLimit, Severity};
    use serde_json::json;

    fn aggregator() -> Arc<MetricsAggregator> {
        Arc::new(MetricsAggregator::new(1000))
    }

    fn withdrawal(amount: f64) -> ProgramEvent {
        let mut event = ProgramEvent::new(
            EventKind::RewardsWithdrawn,
            "sig",
            10,
            Severity::Medium,
        );
        event.amount = Some(amount);
        event
    }

    fn amount_rule() -> AlertRule {
        let mut rule = AlertRule::new("r1", "large-withdrawal", Severity::High);
        rule.event_kinds = Some(vec![EventKind::RewardsWithdrawn]);
        rule.conditions = vec![FieldCondition {
            field: "amount".to_string(),
            operator: ConditionOperator::GreaterThan,
            value: json!(100),
        }];
        rule
    }

    #[tokio::test]
    async fn test_matching_event_fires_rule() {
        let engine = RuleEngine::new(vec![amount_rule()], aggregator());
        let fired = engine.evaluate(&withdrawal(150.0));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].id, "r1");
        assert!(engine.list_rules()[0].last_triggered.is_some());
    }

    #[tokio::test]
    async fn test_condition_below_threshold_does_not_fire() {
        let engine = RuleEngine::new(vec![amount_rule()], aggregator());
        assert!(engine.evaluate(&withdrawal(50.0)).is_empty());
    }

    #[tokio::test]
    async fn test_disabled_rule_never_fires() {
        let mut rule = amount_rule();
        rule.enabled = false;
        let engine = RuleEngine::new(vec![rule], aggregator());
        assert!(engine.evaluate(&withdrawal(150.0)).is_empty());
    }

    #[tokio::test]
    async fn test_kind_filter_excludes_other_kinds() {
        let engine = RuleEngine::new(vec![amount_rule()], aggregator());
        let mut event = ProgramEvent::new(EventKind::HighVolume, "sig", 10, Severity::Medium);
        event.amount = Some(150.0);
        assert!(engine.evaluate(&event).is_empty());
    }

    #[tokio::test]
    async fn test_min_severity_filter() {
        let mut rule = AlertRule::new("r2", "critical-only", Severity::High);
        rule.min_severity = Some(Severity::Critical);
        let engine = RuleEngine::new(vec![rule], aggregator());

        let low = ProgramEvent::new(EventKind::PoolPaused, "sig", 10, Severity::High);
        assert!(engine.evaluate(&low).is_empty());

        let critical = ProgramEvent::new(EventKind::PoolPaused, "sig", 10, Severity::Critical);
        assert_eq!(engine.evaluate(&critical).len(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_blocks_until_expiry() {
        let mut rule = amount_rule();
        rule.cooldown_ms = Some(300_000);
        let engine = RuleEngine::new(vec![rule], aggregator());
        let t0 = Utc::now();

        assert_eq!(engine.evaluate_at(&withdrawal(150.0), t0).len(), 1);
        assert!(engine
            .evaluate_at(&withdrawal(150.0), t0 + ChronoDuration::milliseconds(100_000))
            .is_empty());
        assert_eq!(
            engine
                .evaluate_at(&withdrawal(150.0), t0 + ChronoDuration::milliseconds(300_001))
                .len(),
            1
        );
        engine.stop();
    }

    #[tokio::test]
    async fn test_no_cooldown_fires_every_match() {
        let engine = RuleEngine::new(vec![amount_rule()], aggregator());
        assert_eq!(engine.evaluate(&withdrawal(150.0)).len(), 1);
        assert_eq!(engine.evaluate(&withdrawal(150.0)).len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_counts_prior_qualifying_events() {
        let aggregator = aggregator();
        let mut rule = amount_rule();
        rule.rate_limit = Some(RateLimit {
            max_events: 2,
            window_ms: 60_000,
        });
        let engine = RuleEngine::new(vec![rule], Arc::clone(&aggregator));

        // Pipeline order: evaluate, then record.
        assert_eq!(engine.evaluate(&withdrawal(150.0)).len(), 1);
        aggregator.record(&withdrawal(150.0));
        assert_eq!(engine.evaluate(&withdrawal(150.0)).len(), 1);
        aggregator.record(&withdrawal(150.0));
        // Two prior qualifying events in the window: suppressed.
        assert!(engine.evaluate(&withdrawal(150.0)).is_empty());

        // Non-qualifying events do not count against the budget.
        aggregator.record(&withdrawal(10.0));
        assert!(engine.evaluate(&withdrawal(150.0)).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_regex_is_unmet_not_fatal() {
        let mut rule = AlertRule::new("r3", "regex", Severity::Low);
        rule.conditions = vec![FieldCondition {
            field: "error".to_string(),
            operator: ConditionOperator::Regex,
            value: json!("(unclosed"),
        }];
        let engine = RuleEngine::new(vec![rule], aggregator());

        let mut event = ProgramEvent::new(EventKind::ContractError, "sig", 10, Severity::High);
        event.error = Some("unclosed paren".to_string());
        assert!(engine.evaluate(&event).is_empty());
    }

    #[tokio::test]
    async fn test_operator_semantics() {
        let mut event = ProgramEvent::new(EventKind::ContractError, "sig", 10, Severity::High);
        event.error = Some("custom program error 0x3".to_string());
        event.address = Some("alice".to_string());

        let met = |field: &str, operator, value| {
            condition_met(
                &event,
                &FieldCondition {
                    field: field.to_string(),
                    operator,
                    value,
                },
            )
        };

        assert!(met("address", ConditionOperator::Equals, json!("alice")));
        assert!(met("address", ConditionOperator::NotEquals, json!("bob")));
        assert!(met("error", ConditionOperator::Contains, json!("0x3")));
        assert!(met("error", ConditionOperator::NotContains, json!("0x4")));
        assert!(met("error", ConditionOperator::Regex, json!("error 0x[0-9a-f]+")));
        // Non-numeric operands never satisfy ordering comparisons.
        assert!(!met("address", ConditionOperator::GreaterThan, json!(5)));
        // Missing field: equality fails, inequality holds.
        assert!(!met("amount", ConditionOperator::Equals, json!(1)));
        assert!(met("amount", ConditionOperator::NotEquals, json!(1)));
    }

    #[tokio::test]
    async fn test_threshold_breach() {
        let mut rule = AlertRule::new("r4", "error-rate", Severity::Critical);
        rule.thresholds = Some(
            [("error_rate".to_string(), 0.25)]
                .into_iter()
                .collect(),
        );
        let aggregator = aggregator();
        let engine = RuleEngine::new(vec![rule], Arc::clone(&aggregator));

        aggregator.record(&ProgramEvent::new(
            EventKind::ContractError,
            "sig",
            1,
            Severity::High,
        ));
        aggregator.record(&ProgramEvent::new(
            EventKind::TaskCompletionRecorded,
            "sig",
            1,
            Severity::Low,
        ));

        let breached = engine.check_thresholds(&aggregator.snapshot());
        assert_eq!(breached.len(), 1);
        assert!(breached[0].1.contains("error_rate"));
    }

    #[tokio::test]
    async fn test_duplicate_rule_rejected() {
        let engine = RuleEngine::new(vec![amount_rule()], aggregator());
        assert!(engine.add_rule(amount_rule()).is_err());
        assert!(engine.remove_rule("r1").is_ok());
        assert!(engine.remove_rule("r1").is_err());
    }
}
