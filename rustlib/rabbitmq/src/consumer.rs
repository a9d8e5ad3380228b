use std::{cmp, sync::Arc, time::Duration};

use futures_util::StreamExt;
use lapin::{
    message::Delivery,
    options::*,
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use serde_json::Value;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::processor::Processor;

const RETRY_COUNT_HEADER: &str = "x-retry-count";
const ERROR_REASON_HEADER: &str = "x-error-reason";
const REASON_EXCEEDED_MAX_RETRIES: &str = "exceeded_max_retries";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const INIT_CONNECT_ATTEMPTS: u32 = 5;

#[derive(Error, Debug)]
pub enum WorkerError {
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
    #[error("Failed to register consumer: {0}")]
    ConsumerRegistrationFailed(String),
    #[error("Failed to publish message: {0}")]
    PublishFailed(String),
    #[error("Failed to acknowledge message: {0}")]
    AckFailed(String),
    #[error("Context timeout: {0}")]
    Timeout(String),
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub amqp_url: String,
    pub exchange: String,
    /// Per-message deadline for the stage's `process`.
    pub processing_timeout: Duration,
    /// Delivery attempts before an envelope moves to the error queue.
    pub max_retries: u32,
}

/// One broker session: the connection, the channel and the declared topology.
/// A fresh session is created on every (re)connect cycle and dropped with it,
/// so no connection state outlives a broker outage.
struct Session {
    connection: Connection,
    channel: Channel,
}

impl Session {
    async fn open(options: &WorkerOptions, processor: &dyn Processor) -> Result<Self, WorkerError> {
        let connection = timeout(
            CONNECT_TIMEOUT,
            Connection::connect(&options.amqp_url, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| WorkerError::Timeout("Connection timeout".to_string()))?
        .map_err(|e| WorkerError::ConnectionFailed(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| WorkerError::ChannelFailed(e.to_string()))?;

        // One in-flight message per worker; scale is horizontal.
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| WorkerError::ChannelFailed(format!("failed to set QoS: {}", e)))?;

        channel
            .exchange_declare(
                &options.exchange,
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
            .map_err(|e| WorkerError::ExchangeDeclarationFailed(e.to_string()))?;

        let mut queues: Vec<&str> = vec![processor.input_queue(), processor.error_queue()];
        queues.extend(processor.output_queues().iter().map(|q| q.as_str()));

        for queue in queues {
            channel
                .queue_declare(
                    queue,
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
                .map_err(|e| WorkerError::QueueDeclarationFailed(e.to_string()))?;

            // Every queue is bound to the shared exchange under its own name.
            channel
                .queue_bind(
                    queue,
                    &options.exchange,
                    queue,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    WorkerError::QueueBindFailed(format!(
                        "Failed to bind queue {} to exchange {}: {}",
                        queue, options.exchange, e
                    ))
                })?;
        }

        Ok(Session {
            connection,
            channel,
        })
    }

    async fn close(self) {
        if let Err(e) = self.channel.close(200, "bye").await {
            log::debug!("rabbitmq: channel close failed: {}", e);
        }
        if let Err(e) = self.connection.close(200, "bye").await {
            log::debug!("rabbitmq: connection close failed: {}", e);
        }
    }
}

/// Generic at-least-once consumer wrapped around one pipeline stage.
///
/// The worker owns its broker session exclusively. On success the next-stage
/// publish always precedes the ack of the input envelope; on failure the
/// envelope is republished to its own queue with an incremented retry count
/// until `max_retries`, then moved to the error queue.
pub struct Worker {
    options: WorkerOptions,
    processor: Arc<dyn Processor>,
}

impl Worker {
    pub fn new(options: WorkerOptions, processor: Arc<dyn Processor>) -> Self {
        Worker { options, processor }
    }

    /// Runs the consume/reconnect loop until `shutdown` fires.
    ///
    /// Returns an error only when the very first connection cannot be
    /// established within the init retry budget; once a session has been
    /// opened the worker reconnects indefinitely.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), WorkerError> {
        let mut connected_once = false;
        let mut init_failures = 0u32;
        let mut init_backoff = Duration::from_millis(250);

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let session = match Session::open(&self.options, self.processor.as_ref()).await {
                Ok(session) => session,
                Err(e) if !connected_once => {
                    init_failures += 1;
                    if init_failures >= INIT_CONNECT_ATTEMPTS {
                        return Err(e);
                    }
                    log::warn!(
                        "rabbitmq: initial connect failed; queue={} err={} retry_in_ms={}",
                        self.processor.input_queue(),
                        e,
                        init_backoff.as_millis()
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(init_backoff) => {}
                    }
                    init_backoff = cmp::min(init_backoff.saturating_mul(2), Duration::from_secs(10));
                    continue;
                }
                Err(e) => {
                    log::error!(
                        "rabbitmq: reconnect failed; queue={} err={}",
                        self.processor.input_queue(),
                        e
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(RECONNECT_DELAY) => {}
                    }
                    continue;
                }
            };
            connected_once = true;

            log::info!(
                "rabbitmq: consuming; queue={} exchange={}",
                self.processor.input_queue(),
                self.options.exchange
            );

            match self.consume(&session, &shutdown).await {
                Ok(()) => log::info!(
                    "rabbitmq: consumer stopped; queue={}",
                    self.processor.input_queue()
                ),
                Err(e) => log::error!(
                    "rabbitmq: consumer error; queue={} err={}",
                    self.processor.input_queue(),
                    e
                ),
            }

            session.close().await;

            if shutdown.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(RECONNECT_DELAY) => {}
            }
        }

        Ok(())
    }

    async fn consume(
        &self,
        session: &Session,
        shutdown: &CancellationToken,
    ) -> Result<(), WorkerError> {
        let mut consumer = session
            .channel
            .basic_consume(
                self.processor.input_queue(),
                "",
                BasicConsumeOptions {
                    no_ack: false,
                    exclusive: false,
                    no_local: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| WorkerError::ConsumerRegistrationFailed(e.to_string()))?;

        loop {
            // Stop pulling new deliveries on shutdown; an in-flight message
            // below is allowed to finish under its processing deadline.
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                next = consumer.next() => match next {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => return Err(WorkerError::ConnectionFailed(e.to_string())),
                    None => return Ok(()),
                },
            };

            self.handle_delivery(&session.channel, delivery).await?;
        }
    }

    async fn handle_delivery(
        &self,
        channel: &Channel,
        delivery: Delivery,
    ) -> Result<(), WorkerError> {
        let content: Value = match serde_json::from_slice(&delivery.data) {
            Ok(content) => content,
            Err(e) => {
                // An undecodable body fails identically on every attempt and
                // drains to the error queue through the normal retry path.
                log::error!(
                    "rabbitmq: failed to decode message body; queue={} err={}",
                    self.processor.input_queue(),
                    e
                );
                return self.fail(channel, &delivery).await;
            }
        };

        let outcome = timeout(
            self.options.processing_timeout,
            self.processor.process(content.clone()),
        )
        .await;

        match outcome {
            Ok(Ok((routing_key, payload))) => {
                if routing_key.is_empty() {
                    // Terminal outcome: nothing to forward.
                    self.ack(channel, &delivery).await
                } else if !self
                    .processor
                    .output_queues()
                    .iter()
                    .any(|queue| queue == &routing_key)
                {
                    log::error!(
                        "rabbitmq: routing key {} is not among the stage's output queues; failing message",
                        routing_key
                    );
                    self.fail(channel, &delivery).await
                } else {
                    let body = serde_json::to_vec(&payload)
                        .map_err(|e| WorkerError::PublishFailed(e.to_string()))?;
                    // Publish precedes ack: a crash between the two yields a
                    // redelivery, never a lost message.
                    self.publish(channel, &routing_key, &body, None).await?;
                    self.ack(channel, &delivery).await
                }
            }
            Ok(Err(e)) => {
                log::error!(
                    "rabbitmq: processing failed; queue={} err={}",
                    self.processor.input_queue(),
                    e
                );
                if self.processor.handle_error(&e, Some(&content)).await {
                    log::info!(
                        "rabbitmq: failure swallowed by stage; queue={}",
                        self.processor.input_queue()
                    );
                    self.ack(channel, &delivery).await
                } else {
                    self.fail(channel, &delivery).await
                }
            }
            Err(_) => {
                log::error!(
                    "rabbitmq: processing timed out after {:?}; queue={}",
                    self.options.processing_timeout,
                    self.processor.input_queue()
                );
                self.fail(channel, &delivery).await
            }
        }
    }

    /// Default failure path: requeue with an incremented retry count, or move
    /// to the error queue once the budget is spent. The original envelope is
    /// only acked after the republish succeeded.
    async fn fail(&self, channel: &Channel, delivery: &Delivery) -> Result<(), WorkerError> {
        let retry_count =
            retry_count_from_headers(delivery.properties.headers()).saturating_add(1);
        let mut headers = headers_with_retry_count(delivery.properties.headers(), retry_count);

        let routing_key = if retry_count < self.options.max_retries {
            log::info!(
                "rabbitmq: requeueing message; queue={} retry_count={}",
                self.processor.input_queue(),
                retry_count
            );
            self.processor.input_queue()
        } else {
            headers.insert(
                ERROR_REASON_HEADER.into(),
                AMQPValue::LongString(REASON_EXCEEDED_MAX_RETRIES.into()),
            );
            log::warn!(
                "rabbitmq: message exceeded max retries; queue={} retry_count={} moving to {}",
                self.processor.input_queue(),
                retry_count,
                self.processor.error_queue()
            );
            self.processor.error_queue()
        };

        self.publish(channel, routing_key, &delivery.data, Some(headers))
            .await?;
        self.ack(channel, delivery).await
    }

    async fn publish(
        &self,
        channel: &Channel,
        routing_key: &str,
        body: &[u8],
        headers: Option<FieldTable>,
    ) -> Result<(), WorkerError> {
        let mut properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2); // persistent
        if let Some(headers) = headers {
            properties = properties.with_headers(headers);
        }

        let _confirm = channel
            .basic_publish(
                &self.options.exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map_err(|e| WorkerError::PublishFailed(e.to_string()))?;

        log::debug!(
            "rabbitmq: published message; exchange={} routing_key={}",
            self.options.exchange,
            routing_key
        );
        Ok(())
    }

    async fn ack(&self, channel: &Channel, delivery: &Delivery) -> Result<(), WorkerError> {
        channel
            .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| WorkerError::AckFailed(e.to_string()))
    }
}

/// Reads the retry counter defensively: the header round-trips through a
/// transport that may type-coerce, so missing, negative or non-numeric values
/// all count as zero.
fn retry_count_from_headers(headers: &Option<FieldTable>) -> u32 {
    let Some(headers) = headers.as_ref() else {
        return 0;
    };
    let Some(value) = headers.inner().get(RETRY_COUNT_HEADER) else {
        return 0;
    };
    match value {
        AMQPValue::LongUInt(n) => *n,
        AMQPValue::LongInt(n) => (*n).try_into().unwrap_or(0),
        AMQPValue::LongLongInt(n) => (*n).try_into().unwrap_or(0),
        AMQPValue::ShortUInt(n) => u32::from(*n),
        AMQPValue::ShortInt(n) => (*n).try_into().unwrap_or(0),
        AMQPValue::ShortShortUInt(n) => u32::from(*n),
        AMQPValue::ShortShortInt(n) => (*n).try_into().unwrap_or(0),
        AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes())
            .trim()
            .parse()
            .unwrap_or(0),
        _ => 0,
    }
}

/// Clones the existing headers and stores the counter back as a canonical
/// integer.
fn headers_with_retry_count(headers: &Option<FieldTable>, retry_count: u32) -> FieldTable {
    let mut headers = headers.as_ref().cloned().unwrap_or_default();
    headers.insert(
        RETRY_COUNT_HEADER.into(),
        AMQPValue::LongInt(retry_count.min(i32::MAX as u32) as i32),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(value: AMQPValue) -> Option<FieldTable> {
        let mut headers = FieldTable::default();
        headers.insert(RETRY_COUNT_HEADER.into(), value);
        Some(headers)
    }

    #[test]
    fn test_retry_count_missing_headers() {
        assert_eq!(retry_count_from_headers(&None), 0);
        assert_eq!(retry_count_from_headers(&Some(FieldTable::default())), 0);
    }

    #[test]
    fn test_retry_count_integer_variants() {
        assert_eq!(retry_count_from_headers(&table(AMQPValue::LongInt(4))), 4);
        assert_eq!(retry_count_from_headers(&table(AMQPValue::LongUInt(2))), 2);
        assert_eq!(
            retry_count_from_headers(&table(AMQPValue::LongLongInt(9))),
            9
        );
        assert_eq!(retry_count_from_headers(&table(AMQPValue::ShortInt(1))), 1);
    }

    #[test]
    fn test_retry_count_negative_is_zero() {
        assert_eq!(retry_count_from_headers(&table(AMQPValue::LongInt(-3))), 0);
        assert_eq!(
            retry_count_from_headers(&table(AMQPValue::LongLongInt(-1))),
            0
        );
    }

    #[test]
    fn test_retry_count_string_coercion() {
        assert_eq!(
            retry_count_from_headers(&table(AMQPValue::LongString("3".into()))),
            3
        );
        assert_eq!(
            retry_count_from_headers(&table(AMQPValue::LongString("not-a-number".into()))),
            0
        );
    }

    #[test]
    fn test_headers_round_trip_canonical_integer() {
        // Whatever encoding came in, the counter goes out as a LongInt and
        // reads back as the same number.
        let incoming = table(AMQPValue::LongString("5".into()));
        let updated = headers_with_retry_count(&incoming, 6);
        assert!(matches!(
            updated.inner().get(RETRY_COUNT_HEADER),
            Some(AMQPValue::LongInt(6))
        ));
        assert_eq!(retry_count_from_headers(&Some(updated)), 6);
    }

    #[test]
    fn test_headers_preserve_existing_keys() {
        let mut headers = FieldTable::default();
        headers.insert("x-custom".into(), AMQPValue::LongString("keep-me".into()));
        let updated = headers_with_retry_count(&Some(headers), 1);
        assert!(updated.inner().contains_key("x-custom"));
        assert_eq!(retry_count_from_headers(&Some(updated)), 1);
    }
}
