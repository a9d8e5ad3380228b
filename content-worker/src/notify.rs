use rabbitmq::Publisher;
use tracing::debug;

use crate::config::Config;
use crate::error::ProcessingError;
use crate::models::NotificationMessage;

/// Fire-and-forget publisher for progress notifications. Each publish opens
/// its own short-lived connection: stages must never share the worker's
/// channel, and a notifier outage can only fail the notification publish,
/// never wedge the stage's consume loop.
#[derive(Clone)]
pub struct Notifier {
    amqp_url: String,
    exchange: String,
    notify_queue: String,
}

impl Notifier {
    pub fn new(config: &Config) -> Self {
        Notifier {
            amqp_url: config.broker_url.clone(),
            exchange: config.exchange.clone(),
            notify_queue: config.notify_queue.clone(),
        }
    }

    /// Publishes the envelope to the notify queue. Delivery to the end-user
    /// transport is the notifier stage's job; callers do not wait for it.
    pub async fn notify(&self, message: &NotificationMessage) -> Result<(), ProcessingError> {
        let publisher = Publisher::new(&self.amqp_url, &self.exchange, &self.notify_queue)
            .await
            .map_err(|e| ProcessingError::Processing(format!("notify connect failed: {}", e)))?;

        publisher
            .publish(message)
            .await
            .map_err(|e| ProcessingError::Processing(format!("notify publish failed: {}", e)))?;

        publisher
            .close()
            .await
            .map_err(|e| ProcessingError::Processing(format!("notify close failed: {}", e)))?;

        debug!("Published notification for {}", message.url);
        Ok(())
    }
}
