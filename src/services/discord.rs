// src/services/discord.rs

//! Discord webhook dispatch.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::NotifierConfig;
use crate::pipeline::NotificationPayload;
use crate::services::message;
use crate::utils::http;

/// Delivers notification payloads somewhere a human will read them.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one payload. Failures are [`AppError::Dispatch`].
    async fn dispatch(&self, payload: &NotificationPayload) -> Result<()>;
}

/// Posts payloads to a Discord webhook.
pub struct DiscordWebhook {
    url: String,
    config: Arc<NotifierConfig>,
    client: Client,
}

impl DiscordWebhook {
    /// Build a webhook client from configuration.
    ///
    /// `webhook_url` is the resolved URL (environment overrides the file).
    pub fn new(webhook_url: impl Into<String>, config: Arc<NotifierConfig>) -> Result<Self> {
        let url = webhook_url.into();
        if url.trim().is_empty() {
            return Err(AppError::config("Discord webhook URL is empty"));
        }
        url::Url::parse(&url)?;

        let client = http::create_webhook_client(&config)?;
        Ok(Self {
            url,
            config,
            client,
        })
    }
}

#[async_trait]
impl Notifier for DiscordWebhook {
    async fn dispatch(&self, payload: &NotificationPayload) -> Result<()> {
        let body = message::render(
            payload,
            self.config.max_description_chars,
            self.config.username.as_deref(),
        );

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::dispatch(format!("webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::dispatch(format!(
                "webhook returned {}: {}",
                status,
                text.trim()
            )));
        }

        log::info!(
            "Notified {} {} entries for {} {}",
            payload.len(),
            payload.direction,
            payload.airport,
            payload.range
        );
        Ok(())
    }
}

/// Notifier used when no webhook is configured; logs and drops payloads.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn dispatch(&self, payload: &NotificationPayload) -> Result<()> {
        let rendered = message::render(payload, usize::MAX, None);
        for embed in rendered.embeds {
            log::info!("{}\n{}", embed.title, embed.description);
        }
        Ok(())
    }
}
