use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
    ExchangeKind,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

#[derive(Error, Debug)]
pub enum PublisherError {
    #[error("Failed to connect to RabbitMQ: {0}")]
    ConnectionFailed(String),
    #[error("Failed to open channel: {0}")]
    ChannelFailed(String),
    #[error("Failed to declare exchange: {0}")]
    ExchangeDeclarationFailed(String),
    #[error("Failed to declare queue: {0}")]
    QueueDeclarationFailed(String),
    #[error("Failed to bind queue: {0}")]
    QueueBindFailed(String),
    #[error("Failed to serialize message: {0}")]
    SerializationFailed(String),
    #[error("Failed to publish message: {0}")]
    PublishFailed(String),
    #[error("Context timeout: {0}")]
    Timeout(String),
}

/// Publisher represents a RabbitMQ publisher bound to one exchange and a
/// default routing key. The queue named after the routing key is declared and
/// bound up front so messages published before any consumer starts are kept.
pub struct Publisher {
    connection: Connection,
    channel: Channel,
    exchange: String,
    routing_key: String,
}

impl Publisher {
    /// Creates a new RabbitMQ publisher instance
    pub async fn new(
        amqp_url: &str,
        exchange_name: &str,
        routing_key: &str,
    ) -> Result<Self, PublisherError> {
        // Create connection with timeout
        let connection = timeout(
            Duration::from_secs(60),
            Connection::connect(amqp_url, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| PublisherError::Timeout("Connection timeout".to_string()))?
        .map_err(|e| PublisherError::ConnectionFailed(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| PublisherError::ChannelFailed(e.to_string()))?;

        // Declare exchange with the same parameters as the consumer side
        channel
            .exchange_declare(
                exchange_name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                    passive: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| PublisherError::ExchangeDeclarationFailed(e.to_string()))?;

        // Queue name equals routing key across the pipeline topology
        channel
            .queue_declare(
                routing_key,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                    passive: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| PublisherError::QueueDeclarationFailed(e.to_string()))?;

        channel
            .queue_bind(
                routing_key,
                exchange_name,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                PublisherError::QueueBindFailed(format!(
                    "Failed to bind queue {} to exchange {}: {}",
                    routing_key, exchange_name, e
                ))
            })?;

        Ok(Publisher {
            connection,
            channel,
            exchange: exchange_name.to_string(),
            routing_key: routing_key.to_string(),
        })
    }

    /// Publishes a message to the default routing key
    pub async fn publish<T: Serialize>(&self, message: &T) -> Result<(), PublisherError> {
        let routing_key = self.routing_key.clone();
        self.publish_with_routing_key(&routing_key, message).await
    }

    /// Publishes a message with a custom routing key
    pub async fn publish_with_routing_key<T: Serialize>(
        &self,
        routing_key: &str,
        message: &T,
    ) -> Result<(), PublisherError> {
        let body = serde_json::to_vec(message)
            .map_err(|e| PublisherError::SerializationFailed(e.to_string()))?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2); // persistent

        let _confirm = self
            .channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await
            .map_err(|e| PublisherError::PublishFailed(e.to_string()))?;

        log::debug!(
            "rabbitmq: published message; exchange={} routing_key={}",
            self.exchange,
            routing_key
        );
        Ok(())
    }

    /// Checks if the publisher connection is still open
    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// Returns the exchange name
    pub fn get_exchange(&self) -> &str {
        &self.exchange
    }

    /// Closes the publisher connection and channel
    pub async fn close(self) -> Result<(), PublisherError> {
        self.channel
            .close(200, "bye")
            .await
            .map_err(|e| PublisherError::ChannelFailed(e.to_string()))?;
        self.connection
            .close(200, "bye")
            .await
            .map_err(|e| PublisherError::ConnectionFailed(e.to_string()))?;
        Ok(())
    }
}
