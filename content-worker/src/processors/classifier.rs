use std::sync::Arc;

use async_trait::async_trait;
use rabbitmq::{Processor, ProcessorError};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::db::ContentStore;
use crate::error::{as_processing_error, ProcessingError};
use crate::llm::openai_chat;
use crate::models::{
    ClassifiedContent, Content, ContentStatus, ContentType, NotificationMessage, NotificationType,
    SubmittedContent,
};
use crate::notify::Notifier;
use crate::urls;
use crate::workflow::ProcessorConfig;

const CLASSIFY_MODEL: &str = "gpt-4o-mini";

const CLASSIFY_PROMPT: &str = "\
Classify the given content as web_article, publication, youtube_video, bookmark or unknown based on its type.

- Determine whether the content is text or a URL.
- If it's a URL, identify if it links to a web article, a YouTube video, a scientific publication, or consider it a general bookmark if it doesn't fit the other categories.
- If the URL is unclear whether it's a web article or a general website bookmark, default to bookmark unless clear evidence suggests otherwise.
- If the content is text which doesn't contain a URL, classify it as unknown.

Respond with a JSON object of the form {\"content_type\": \"<type>\", \"url\": \"<url or empty>\"}.";

/// First stage: turns a raw submission into a classified `Content` record and
/// routes it to the crawler or the transcriber.
pub struct ClassifierProcessor {
    config: Arc<Config>,
    queues: ProcessorConfig,
    http: reqwest::Client,
    store: ContentStore,
    notifier: Notifier,
}

impl ClassifierProcessor {
    pub fn new(config: Arc<Config>, queues: ProcessorConfig) -> anyhow::Result<Self> {
        let store = ContentStore::new(&config.content_store_url)?;
        let notifier = Notifier::new(&config);
        Ok(ClassifierProcessor {
            http: reqwest::Client::new(),
            store,
            notifier,
            config,
            queues,
        })
    }

    async fn classify(&self, input_text: &str) -> Result<ClassifiedContent, ProcessingError> {
        let reply = openai_chat(
            &self.http,
            &self.config.openai_api_key,
            CLASSIFY_MODEL,
            CLASSIFY_PROMPT,
            input_text,
            256,
            true,
        )
        .await?;

        serde_json::from_str(&reply)
            .map_err(|e| ProcessingError::Processing(format!("Failed to parse classification: {}", e)))
    }

    /// Tells the submitter the content was not usable, then returns the benign
    /// error the error hook swallows. Rejections are terminal, never retried.
    async fn reject(&self, submitted: &SubmittedContent, reason: String) -> ProcessingError {
        let note = NotificationMessage {
            url: submitted.content.clone(),
            status: ContentStatus::Submitted,
            notification_type: NotificationType::Info,
            source: submitted.source.clone(),
            message: "Content could not be classified.".to_string(),
        };
        if let Err(e) = self.notifier.notify(&note).await {
            error!("Failed to send rejection notification: {}", e);
        }
        ProcessingError::Unclassifiable(reason)
    }
}

/// Closed routing table from content type to the next stage's queue. `None`
/// means the content cannot enter the pipeline.
pub(crate) fn output_queue_for(
    content_type: ContentType,
    crawl_queue: &str,
    transcribe_queue: &str,
) -> Option<String> {
    match content_type {
        ContentType::WebArticle | ContentType::Publication | ContentType::Bookmark => {
            Some(crawl_queue.to_string())
        }
        ContentType::YoutubeVideo => Some(transcribe_queue.to_string()),
        ContentType::Unknown => None,
    }
}

#[async_trait]
impl Processor for ClassifierProcessor {
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
        let submitted: SubmittedContent = serde_json::from_value(content)
            .map_err(|e| ProcessingError::Validation(e.to_string()))?;
        submitted.validate().map_err(ProcessingError::Validation)?;

        info!("Starting content classification");
        let classified = self.classify(&submitted.content).await?;

        let url = classified.url.clone().unwrap_or_default();
        if classified.content_type == ContentType::Unknown || url.is_empty() {
            return Err(self
                .reject(
                    &submitted,
                    format!("classification yielded {:?}", classified.content_type),
                )
                .await
                .into());
        }

        let url = urls::clean_url(&self.http, &url).await;

        if self.store.check_url_exists(&url).await? {
            info!("URL already exists in the database: {}", url);
            self.notifier
                .notify(&NotificationMessage {
                    url: url.clone(),
                    status: ContentStatus::Classified,
                    notification_type: NotificationType::Info,
                    source: submitted.source.clone(),
                    message: "URL already exists in the database.".to_string(),
                })
                .await?;
            return Err(ProcessingError::AlreadyExists(url).into());
        }

        let Some(routing_key) = output_queue_for(
            classified.content_type,
            &self.config.crawl_queue,
            &self.config.transcribe_queue,
        ) else {
            return Err(self
                .reject(&submitted, "no route for content type".to_string())
                .await
                .into());
        };

        let record = Content {
            content_id: Uuid::new_v4().to_string(),
            url,
            content_type: classified.content_type,
            status: ContentStatus::Classified,
            title: None,
            description: None,
            image_url: None,
            canonical_url: None,
            keywords: None,
            raw_content: None,
            summary: None,
            source: submitted.source,
        };

        info!(
            "Content classified as {:?}; queued for {}",
            record.content_type, routing_key
        );
        Ok((routing_key, serde_json::to_value(record)?))
    }

    async fn handle_error(&self, error: &ProcessorError, _content: Option<&Value>) -> bool {
        match as_processing_error(error) {
            Some(ProcessingError::AlreadyExists(url)) => {
                info!("Content already exists, dropping submission: {}", url);
                true
            }
            Some(ProcessingError::Unclassifiable(reason)) => {
                info!("Unclassifiable submission dropped: {}", reason);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_table_is_exhaustive() {
        let crawl = "crawl_queue";
        let transcribe = "transcribe_queue";

        assert_eq!(
            output_queue_for(ContentType::WebArticle, crawl, transcribe).as_deref(),
            Some(crawl)
        );
        assert_eq!(
            output_queue_for(ContentType::Publication, crawl, transcribe).as_deref(),
            Some(crawl)
        );
        assert_eq!(
            output_queue_for(ContentType::Bookmark, crawl, transcribe).as_deref(),
            Some(crawl)
        );
        assert_eq!(
            output_queue_for(ContentType::YoutubeVideo, crawl, transcribe).as_deref(),
            Some(transcribe)
        );
        assert_eq!(
            output_queue_for(ContentType::Unknown, crawl, transcribe),
            None
        );
    }

    #[tokio::test]
    async fn test_benign_errors_are_swallowed() {
        let config = Arc::new(Config::from_env());
        let queues = crate::workflow::stage_config(&config, "classifier").unwrap();
        let processor = ClassifierProcessor::new(config, queues).unwrap();

        let exists: ProcessorError =
            ProcessingError::AlreadyExists("https://example.com/a".to_string()).into();
        assert!(processor.handle_error(&exists, None).await);

        let unknown: ProcessorError =
            ProcessingError::Unclassifiable("plain text".to_string()).into();
        assert!(processor.handle_error(&unknown, None).await);

        let transient: ProcessorError =
            ProcessingError::Processing("timeout".to_string()).into();
        assert!(!processor.handle_error(&transient, None).await);
    }
}
