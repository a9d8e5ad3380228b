mod classifier;
mod crawler;
mod embedding;
mod notifier;
mod summarizer;
mod transcriber;

pub use classifier::ClassifierProcessor;
pub use crawler::CrawlerProcessor;
pub use embedding::EmbeddingProcessor;
pub use notifier::NotifierProcessor;
pub use summarizer::SummarizerProcessor;
pub use transcriber::TranscriberProcessor;
