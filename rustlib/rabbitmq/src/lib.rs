pub mod consumer;
pub mod processor;
pub mod publisher;

pub use consumer::{Worker, WorkerError, WorkerOptions};
pub use processor::{Processor, ProcessorError};
pub use publisher::{Publisher, PublisherError};
