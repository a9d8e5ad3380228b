use std::sync::Arc;

use async_trait::async_trait;
use rabbitmq::{Processor, ProcessorError};
use serde_json::Value;
use tracing::{error, info};

use crate::config::Config;
use crate::error::ProcessingError;
use crate::models::{NotificationMessage, SourceRef, TelegramSource};
use crate::workflow::ProcessorConfig;

/// Default reply text when the producing stage did not set one.
pub(crate) fn build_response_message(message: &NotificationMessage) -> String {
    if !message.message.is_empty() {
        return message.message.clone();
    }
    format!("Content has been {} successfully", message.status.as_str())
}

/// Terminal fan-out stage: delivers notification envelopes to the transport
/// addressed by the message's source.
pub struct NotifierProcessor {
    config: Arc<Config>,
    queues: ProcessorConfig,
    http: reqwest::Client,
}

impl NotifierProcessor {
    pub fn new(config: Arc<Config>, queues: ProcessorConfig) -> anyhow::Result<Self> {
        Ok(NotifierProcessor {
            config,
            queues,
            http: reqwest::Client::new(),
        })
    }

    /// Replies to the originating Telegram chat. A non-2xx response is a
    /// permanent delivery failure (bad chat, blocked bot): logged, not
    /// retried. Transport errors propagate and take the retry path.
    async fn notify_telegram(
        &self,
        telegram: &TelegramSource,
        message: &NotificationMessage,
    ) -> Result<(), ProcessingError> {
        info!("Sending notification to Telegram for content: {}", message.url);

        let endpoint = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.config.telegram_bot_token
        );
        let payload = serde_json::json!({
            "chat_id": telegram.chat_id,
            "reply_to_message_id": telegram.message_id,
            "text": build_response_message(message),
        });

        let response = self
            .http
            .post(&endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                ProcessingError::Processing(format!(
                    "Error sending notification to Telegram: {}",
                    e
                ))
            })?;

        if response.status().is_success() {
            info!("Notification sent to Telegram for content: {}", message.url);
        } else {
            error!(
                "Failed to send notification to Telegram. Status: {}, Error: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            );
        }
        Ok(())
    }

    async fn dispatch(&self, message: &NotificationMessage) -> Result<(), ProcessingError> {
        match &message.source {
            // Closed set of transports; adding one extends this match.
            Some(SourceRef::Telegram(telegram)) => self.notify_telegram(telegram, message).await,
            None => {
                info!(
                    "No notification transport for {}: {}",
                    message.url,
                    build_response_message(message)
                );
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Processor for NotifierProcessor {
    fn input_queue(&self) -> &str {
        &self.queues.input_queue
    }

    fn output_queues(&self) -> &[String] {
        &self.queues.output_queues
    }

    fn error_queue(&self) -> &str {
        &self.queues.error_queue
    }

    async fn process(&self, content: Value) -> Result<(String, Value), ProcessorError> {
        let message: NotificationMessage = serde_json::from_value(content)
            .map_err(|e| ProcessingError::Validation(e.to_string()))?;

        info!("Dispatching notification for: {}", message.url);
        self.dispatch(&message).await?;

        Ok((String::new(), serde_json::to_value(message)?))
    }
}
