use async_trait::async_trait;
use serde_json::Value;

/// Errors returned by a stage's `process`. Kept as a boxed trait object so
/// stages can surface their own domain errors and recognise them again in
/// `handle_error` via downcasting.
pub type ProcessorError = Box<dyn std::error::Error + Send + Sync>;

/// The contract every pipeline stage implements. A stage is bound to exactly
/// one input queue and may only emit to the output queues it declares; the
/// worker kernel treats any other routing key as a programming error.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Queue this stage consumes from.
    fn input_queue(&self) -> &str;

    /// Routing keys this stage is allowed to publish to.
    fn output_queues(&self) -> &[String];

    /// Queue receiving envelopes that exhausted their retry budget.
    fn error_queue(&self) -> &str;

    /// Process one decoded message body. Returns the routing key for the next
    /// stage and the payload to publish there. An empty routing key marks the
    /// message as terminal: it is acknowledged without forwarding.
    async fn process(&self, content: Value) -> Result<(String, Value), ProcessorError>;

    /// Inspect a processing failure before the default retry path runs.
    /// Returning `true` acknowledges the delivery and drops the message;
    /// the default leaves every failure to the retry/error-queue path.
    async fn handle_error(&self, _error: &ProcessorError, _content: Option<&Value>) -> bool {
        false
    }
}
