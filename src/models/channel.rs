//! Notification channel definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Channel kind discriminant, used for payload formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    DiscordWebhook,
    SlackWebhook,
    TelegramBot,
    Webhook,
    Email,
    Sms,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelKind::DiscordWebhook => "discord_webhook",
            ChannelKind::SlackWebhook => "slack_webhook",
            ChannelKind::TelegramBot => "telegram_bot",
            ChannelKind::Webhook => "webhook",
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
        };
        write!(f, "{}", s)
    }
}

/// Kind-specific channel configuration. Closed polymorphic set; one
/// formatter per variant lives in the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelConfig {
    DiscordWebhook {
        webhook_url: String,
    },
    SlackWebhook {
        webhook_url: String,
    },
    TelegramBot {
        bot_token: String,
        chat_id: String,
    },
    Webhook {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Email {
        from: String,
        to: Vec<String>,
        smtp_host: String,
        #[serde(default = "default_smtp_port")]
        smtp_port: u16,
    },
    Sms {
        provider_url: String,
        api_key: String,
        to: Vec<String>,
    },
}

fn default_smtp_port() -> u16 {
    587
}

impl ChannelConfig {
    pub fn kind(&self) -> ChannelKind {
        match self {
            ChannelConfig::DiscordWebhook { .. } => ChannelKind::DiscordWebhook,
            ChannelConfig::SlackWebhook { .. } => ChannelKind::SlackWebhook,
            ChannelConfig::TelegramBot { .. } => ChannelKind::TelegramBot,
            ChannelConfig::Webhook { .. } => ChannelKind::Webhook,
            ChannelConfig::Email { .. } => ChannelKind::Email,
            ChannelConfig::Sms { .. } => ChannelKind::Sms,
        }
    }
}

/// A registered alert destination. Immutable after registration except
/// for the enabled flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertChannel {
    pub id: String,
    /// Unique key referenced by rule channel lists.
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub config: ChannelConfig,
}

fn default_enabled() -> bool {
    true
}

impl AlertChannel {
    pub fn kind(&self) -> ChannelKind {
        self.config.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_config_tagging() {
        let channel: AlertChannel = serde_json::from_value(serde_json::json!({
            "id": "c1",
            "name": "ops-discord",
            "kind": "discord_webhook",
            "webhook_url": "https://discord.com/api/webhooks/x"
        }))
        .unwrap();

        assert_eq!(channel.kind(), ChannelKind::DiscordWebhook);
        assert!(channel.enabled);
    }

    #[test]
    fn test_email_default_port() {
        let channel: AlertChannel = serde_json::from_value(serde_json::json!({
            "id": "c2",
            "name": "oncall-email",
            "kind": "email",
            "from": "sentinel@example.com",
            "to": ["ops@example.com"],
            "smtp_host": "smtp.example.com"
        }))
        .unwrap();

        match channel.config {
            ChannelConfig::Email { smtp_port, .. } => assert_eq!(smtp_port, 587),
            _ => panic!("expected email config"),
        }
    }
}
