//! Alert routing and channel-specific payload formatting.
//!
//! The dispatcher owns the channel registry and the envelope-to-payload
//! translation; the actual network transport lives behind the
//! [`ChannelSender`] trait so tests can record deliveries in memory. A
//! delivery failure is logged and never cancels other in-flight sends.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::models::{
    AlertChannel, AlertEnvelope, AlertRule, ChannelConfig, ProgramEvent, Severity,
};

/// Transport collaborator invoked with the formatted payload. Reports
/// failure through the result; retry is its responsibility, not the
/// dispatcher's.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, channel: &AlertChannel, payload: &Value) -> Result<()>;
}

pub struct AlertDispatcher {
    channels: RwLock<HashMap<String, AlertChannel>>,
    sender: Arc<dyn ChannelSender>,
}

impl AlertDispatcher {
    pub fn new(channels: Vec<AlertChannel>, sender: Arc<dyn ChannelSender>) -> Self {
        let channels = channels
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();
        Self {
            channels: RwLock::new(channels),
            sender,
        }
    }

    pub fn add_channel(&self, channel: AlertChannel) -> AppResult<()> {
        let mut channels = self.channels.write();
        if channels.contains_key(&channel.name) {
            return Err(AppError::Duplicate(format!(
                "Channel '{}' already exists",
                channel.name
            )));
        }
        tracing::info!(channel = %channel.name, kind = %channel.kind(), "Channel registered");
        channels.insert(channel.name.clone(), channel);
        Ok(())
    }

    pub fn remove_channel(&self, name: &str) -> AppResult<AlertChannel> {
        self.channels
            .write()
            .remove(name)
            .ok_or_else(|| AppError::NotFound(format!("Channel '{}' not found", name)))
    }

    pub fn set_channel_enabled(&self, name: &str, enabled: bool) -> AppResult<()> {
        let mut channels = self.channels.write();
        let channel = channels
            .get_mut(name)
            .ok_or_else(|| AppError::NotFound(format!("Channel '{}' not found", name)))?;
        channel.enabled = enabled;
        Ok(())
    }

    pub fn list_channels(&self) -> Vec<AlertChannel> {
        self.channels.read().values().cloned().collect()
    }

    /// Build one envelope per fired rule and deliver to each of the
    /// rule's named channels that exist and are enabled. All sends for
    /// all rules run concurrently.
    pub async fn dispatch(&self, event: &ProgramEvent, fired: &[AlertRule]) {
        let mut deliveries = Vec::new();
        {
            let channels = self.channels.read();
            for rule in fired {
                let envelope = rule_envelope(rule, event);
                for name in &rule.channels {
                    match channels.get(name) {
                        Some(channel) if channel.enabled => {
                            deliveries.push((channel.clone(), envelope.clone()));
                        }
                        Some(_) => {
                            tracing::debug!(channel = %name, rule_id = %rule.id, "Channel disabled, skipping");
                        }
                        None => {
                            tracing::warn!(channel = %name, rule_id = %rule.id, "Rule references unknown channel");
                        }
                    }
                }
            }
        }
        self.deliver(deliveries).await;
    }

    /// Deliver a self-monitoring alert to every enabled channel.
    pub async fn dispatch_system(&self, envelope: AlertEnvelope) {
        let deliveries: Vec<(AlertChannel, AlertEnvelope)> = self
            .channels
            .read()
            .values()
            .filter(|c| c.enabled)
            .map(|c| (c.clone(), envelope.clone()))
            .collect();
        self.deliver(deliveries).await;
    }

    async fn deliver(&self, deliveries: Vec<(AlertChannel, AlertEnvelope)>) {
        let sends = deliveries.into_iter().map(|(channel, envelope)| {
            let sender = Arc::clone(&self.sender);
            async move {
                let payload = format_payload(&channel, &envelope);
                if let Err(e) = sender.send(&channel, &payload).await {
                    tracing::warn!(
                        channel = %channel.name,
                        kind = %channel.kind(),
                        error = %e,
                        "Alert delivery failed"
                    );
                } else {
                    tracing::debug!(channel = %channel.name, "Alert delivered");
                }
            }
        });
        join_all(sends).await;
    }
}

fn rule_envelope(rule: &AlertRule, event: &ProgramEvent) -> AlertEnvelope {
    let mut message = format!(
        "Rule '{}' matched {} event, signature {}",
        rule.name, event.kind, event.signature
    );
    if let Some(amount) = event.amount {
        message.push_str(&format!(", amount {}", amount));
    }
    if let Some(error) = &event.error {
        message.push_str(&format!(": {}", error));
    }

    AlertEnvelope::Rule {
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        severity: rule.severity,
        event: event.clone(),
        message,
        channels: rule.channels.clone(),
    }
}

fn severity_color(severity: Severity) -> u32 {
    match severity {
        Severity::Critical => 0xff0000,
        Severity::High => 0xff6600,
        Severity::Medium => 0xffaa00,
        Severity::Low => 0x0099ff,
    }
}

/// Pure envelope-to-payload translation, one shape per channel kind.
pub fn format_payload(channel: &AlertChannel, envelope: &AlertEnvelope) -> Value {
    match &channel.config {
        ChannelConfig::DiscordWebhook { .. } => json!({
            "embeds": [{
                "title": envelope.title(),
                "description": envelope.message(),
                "color": severity_color(envelope.severity()),
                "fields": detail_fields(envelope)
                    .into_iter()
                    .map(|(name, value)| json!({"name": name, "value": value, "inline": true}))
                    .collect::<Vec<_>>(),
            }]
        }),
        ChannelConfig::SlackWebhook { .. } => json!({
            "attachments": [{
                "color": format!("#{:06x}", severity_color(envelope.severity())),
                "title": envelope.title(),
                "text": envelope.message(),
                "fields": detail_fields(envelope)
                    .into_iter()
                    .map(|(title, value)| json!({"title": title, "value": value, "short": true}))
                    .collect::<Vec<_>>(),
            }]
        }),
        ChannelConfig::TelegramBot { chat_id, .. } => json!({
            "chat_id": chat_id,
            "parse_mode": "HTML",
            "text": format!("<b>{}</b>\n{}", envelope.title(), envelope.message()),
        }),
        ChannelConfig::Webhook { .. } => {
            serde_json::to_value(envelope).unwrap_or_else(|_| json!({"message": envelope.message()}))
        }
        ChannelConfig::Email { from, to, .. } => json!({
            "from": from,
            "to": to,
            "subject": format!("[{}] {}", envelope.severity(), envelope.title()),
            "body": envelope.message(),
        }),
        ChannelConfig::Sms { to, .. } => json!({
            "to": to,
            "text": format!("{}: {}", envelope.severity(), envelope.message()),
        }),
    }
}

fn detail_fields(envelope: &AlertEnvelope) -> Vec<(&'static str, String)> {
    let mut fields = vec![("Severity", envelope.severity().to_string())];
    if let AlertEnvelope::Rule { event, .. } = envelope {
        fields.push(("Kind", event.kind.to_string()));
        fields.push(("Signature", event.signature.clone()));
        fields.push(("Slot", event.slot.to_string()));
        if let Some(amount) = event.amount {
            fields.push(("Amount", amount.to_string()));
        }
        if let Some(pool) = &event.pool_id {
            fields.push(("Pool", pool.clone()));
        }
    }
    fields
}

/// Production transport posting formatted payloads over HTTPS. Email
/// and SMS channels have no HTTP endpoint here and report an error.
pub struct HttpChannelSender {
    client: reqwest::Client,
}

impl HttpChannelSender {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ChannelSender for HttpChannelSender {
    async fn send(&self, channel: &AlertChannel, payload: &Value) -> Result<()> {
        let request = match &channel.config {
            ChannelConfig::DiscordWebhook { webhook_url }
            | ChannelConfig::SlackWebhook { webhook_url } => self.client.post(webhook_url),
            ChannelConfig::TelegramBot { bot_token, .. } => self.client.post(format!(
                "https://api.telegram.org/bot{}/sendMessage",
                bot_token
            )),
            ChannelConfig::Webhook { url, headers } => {
                let mut request = self.client.post(url);
                for (name, value) in headers {
                    request = request.header(name, value);
                }
                request
            }
            ChannelConfig::Sms { provider_url, api_key, .. } => self
                .client
                .post(provider_url)
                .header("Authorization", format!("Bearer {}", api_key)),
            ChannelConfig::Email { .. } => {
                anyhow::bail!("Email transport is not supported by the HTTP sender")
            }
        };

        request
            .json(payload)
            .send()
            .await
            .context("Channel request failed")?
            .error_for_status()
            .context("Channel returned error status")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventKind;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct RecordingSender {
        pub sent: Mutex<Vec<(String, Value)>>,
        pub fail_channels: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChannelSender for RecordingSender {
        async fn send(&self, channel: &AlertChannel, payload: &Value) -> Result<()> {
            if self.fail_channels.lock().iter().any(|n| n == &channel.name) {
                anyhow::bail!("connection refused");
            }
            self.sent.lock().push((channel.name.clone(), payload.clone()));
            Ok(())
        }
    }

    fn discord(name: &str) -> AlertChannel {
        AlertChannel {
            id: format!("id-{}", name),
            name: name.to_string(),
            enabled: true,
            config: ChannelConfig::DiscordWebhook {
                webhook_url: "https://discord.com/api/webhooks/x".to_string(),
            },
        }
    }

    fn rule_with_channels(channels: &[&str]) -> AlertRule {
        let mut rule = AlertRule::new("r1", "large-withdrawal", Severity::High);
        rule.channels = channels.iter().map(|s| s.to_string()).collect();
        rule
    }

    fn withdrawal() -> ProgramEvent {
        let mut event =
            ProgramEvent::new(EventKind::RewardsWithdrawn, "sig", 10, Severity::Medium);
        event.amount = Some(150.0);
        event
    }

    #[tokio::test]
    async fn test_dispatch_builds_envelope_per_rule_channel() {
        let sender = Arc::new(RecordingSender::default());
        let dispatcher = AlertDispatcher::new(
            vec![discord("ops"), discord("audit")],
            sender.clone(),
        );

        dispatcher
            .dispatch(&withdrawal(), &[rule_with_channels(&["ops", "audit"])])
            .await;

        let sent = sender.sent.lock();
        assert_eq!(sent.len(), 2);
        let payload = &sent[0].1;
        assert_eq!(payload["embeds"][0]["color"], 0xff6600);
        assert!(payload["embeds"][0]["description"]
            .as_str()
            .unwrap()
            .contains("amount 150"));
    }

    #[tokio::test]
    async fn test_one_channel_failure_does_not_block_others() {
        let sender = Arc::new(RecordingSender::default());
        sender.fail_channels.lock().push("ops".to_string());
        let dispatcher = AlertDispatcher::new(
            vec![discord("ops"), discord("audit")],
            sender.clone(),
        );

        dispatcher
            .dispatch(&withdrawal(), &[rule_with_channels(&["ops", "audit"])])
            .await;

        let sent = sender.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "audit");
    }

    #[tokio::test]
    async fn test_disabled_and_unknown_channels_skipped() {
        let mut disabled = discord("ops");
        disabled.enabled = false;
        let sender = Arc::new(RecordingSender::default());
        let dispatcher = AlertDispatcher::new(vec![disabled], sender.clone());

        dispatcher
            .dispatch(&withdrawal(), &[rule_with_channels(&["ops", "missing"])])
            .await;

        assert!(sender.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_system_alert_reaches_every_enabled_channel() {
        let mut disabled = discord("muted");
        disabled.enabled = false;
        let sender = Arc::new(RecordingSender::default());
        let dispatcher = AlertDispatcher::new(
            vec![discord("ops"), discord("audit"), disabled],
            sender.clone(),
        );

        dispatcher
            .dispatch_system(AlertEnvelope::system(
                "health_check",
                Severity::Critical,
                "Monitor is unhealthy",
            ))
            .await;

        let sent = sender.sent.lock();
        assert_eq!(sent.len(), 2);
    }

    #[test]
    fn test_payload_shapes_per_kind() {
        let envelope = AlertEnvelope::system("test", Severity::Low, "hello");

        let slack = AlertChannel {
            id: "s".to_string(),
            name: "s".to_string(),
            enabled: true,
            config: ChannelConfig::SlackWebhook {
                webhook_url: "https://hooks.slack.com/x".to_string(),
            },
        };
        let payload = format_payload(&slack, &envelope);
        assert_eq!(payload["attachments"][0]["color"], "#0099ff");

        let telegram = AlertChannel {
            id: "t".to_string(),
            name: "t".to_string(),
            enabled: true,
            config: ChannelConfig::TelegramBot {
                bot_token: "token".to_string(),
                chat_id: "42".to_string(),
            },
        };
        let payload = format_payload(&telegram, &envelope);
        assert_eq!(payload["chat_id"], "42");
        assert!(payload["text"].as_str().unwrap().contains("hello"));

        let email = AlertChannel {
            id: "e".to_string(),
            name: "e".to_string(),
            enabled: true,
            config: ChannelConfig::Email {
                from: "sentinel@example.com".to_string(),
                to: vec!["ops@example.com".to_string()],
                smtp_host: "smtp.example.com".to_string(),
                smtp_port: 587,
            },
        };
        let payload = format_payload(&email, &envelope);
        assert!(payload["subject"].as_str().unwrap().contains("LOW"));
    }

    #[tokio::test]
    async fn test_channel_registry_operations() {
        let dispatcher =
            AlertDispatcher::new(vec![discord("ops")], Arc::new(RecordingSender::default()));

        assert!(dispatcher.add_channel(discord("ops")).is_err());
        assert!(dispatcher.add_channel(discord("audit")).is_ok());
        assert_eq!(dispatcher.list_channels().len(), 2);

        dispatcher.set_channel_enabled("ops", false).unwrap();
        assert!(!dispatcher
            .list_channels()
            .iter()
            .find(|c| c.name == "ops")
            .unwrap()
            .enabled);

        assert!(dispatcher.remove_channel("audit").is_ok());
        assert!(dispatcher.remove_channel("audit").is_err());
    }
}
