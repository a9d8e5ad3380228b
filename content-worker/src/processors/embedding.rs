use std::sync::Arc;

use async_trait::async_trait;
use rabbitmq::{Processor, ProcessorError};
use serde_json::Value;
use tracing::{error, info};

use crate::config::Config;
use crate::error::ProcessingError;
use crate::llm::openai_embeddings;
use crate::models::{Content, ContentStatus, NotificationMessage, NotificationType};
use crate::notify::Notifier;
use crate::splitter::{split_documents, TextSplitter};
use crate::workflow::ProcessorConfig;

const EMBEDDING_MODEL: &str = "text-embedding-3-small";
const CHUNK_SIZE: usize = 500;
const CHUNK_OVERLAP: usize = 50;

/// Builds the logical documents to embed: the raw content, plus the summary
/// when one exists, both tagged with the record's provenance.
pub(crate) fn documents_for(content: &Content) -> Vec<(String, String, String)> {
    let mut documents = Vec::new();
    if let Some(raw_content) = content.raw_content.as_ref().filter(|raw| !raw.is_empty()) {
        documents.push((
            raw_content.clone(),
            content.url.clone(),
            content.content_id.clone(),
        ));
    }
    if let Some(summary) = content.summary.as_ref().filter(|summary| !summary.is_empty()) {
        documents.push((
            summary.clone(),
            content.url.clone(),
            content.content_id.clone(),
        ));
    }
    documents
}

/// Terminal stage: chunk, embed and persist into the vector store, then send
/// the final progress notification.
pub struct EmbeddingProcessor {
    config: Arc<Config>,
    queues: ProcessorConfig,
    http: reqwest::Client,
    vectors: crate::vector::VectorStore,
    notifier: Notifier,
    splitter: TextSplitter,
}

impl EmbeddingProcessor {
    pub fn new(config: Arc<Config>, queues: ProcessorConfig) -> anyhow::Result<Self> {
        let vectors = crate::vector::VectorStore::new(&config.vector_store_url)?;
        let notifier = Notifier::new(&config);
        Ok(EmbeddingProcessor {
            http: reqwest::Client::new(),
            vectors,
            notifier,
            splitter: TextSplitter::new(CHUNK_SIZE, CHUNK_OVERLAP),
            config,
            queues,
        })
    }
}

#[async_trait]
impl Processor for EmbeddingProcessor {
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
        let mut input: Content = serde_json::from_value(content)
            .map_err(|e| ProcessingError::Validation(e.to_string()))?;
        if input.status != ContentStatus::Summarized {
            return Err(ProcessingError::Validation(format!(
                "embedder expects summarized content, got {}",
                input.status.as_str()
            ))
            .into());
        }

        info!("Starting content embedding: {}", input.url);

        if input
            .raw_content
            .as_deref()
            .map_or(true, |raw| raw.is_empty())
        {
            error!("Content is empty, skipping embedding");
            return Err(
                ProcessingError::Processing("Content is empty, skipping embedding".to_string())
                    .into(),
            );
        }

        let documents = documents_for(&input);
        let chunks = split_documents(&self.splitter, &documents);
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();

        let embeddings = openai_embeddings(
            &self.http,
            &self.config.openai_api_key,
            EMBEDDING_MODEL,
            &texts,
        )
        .await?;

        self.vectors
            .add_documents(&self.config.embed_collection, &chunks, &embeddings)
            .await?;

        input.status = ContentStatus::Embedded;
        info!(
            "Content embedding completed: {} chunks for {}",
            chunks.len(),
            input.url
        );

        self.notifier
            .notify(&NotificationMessage {
                url: input.url.clone(),
                status: input.status,
                notification_type: NotificationType::Info,
                source: input.source.clone(),
                message: "Content has been processed successfully.".to_string(),
            })
            .await?;

        // Terminal stage: nothing to forward.
        Ok((String::new(), serde_json::to_value(input)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentType;

    fn content(raw: Option<&str>, summary: Option<&str>) -> Content {
        Content {
            content_id: "id-1".to_string(),
            url: "https://example.com/a".to_string(),
            content_type: ContentType::WebArticle,
            status: ContentStatus::Summarized,
            title: None,
            description: None,
            image_url: None,
            canonical_url: None,
            keywords: None,
            raw_content: raw.map(str::to_string),
            summary: summary.map(str::to_string),
            source: None,
        }
    }

    #[test]
    fn test_documents_include_summary_when_present() {
        let documents = documents_for(&content(Some("raw body"), Some("summary")));
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].0, "raw body");
        assert_eq!(documents[1].0, "summary");
        assert!(documents.iter().all(|d| d.2 == "id-1"));
    }

    #[test]
    fn test_documents_skip_missing_summary() {
        let documents = documents_for(&content(Some("raw body"), None));
        assert_eq!(documents.len(), 1);

        let documents = documents_for(&content(Some("raw body"), Some("")));
        assert_eq!(documents.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_raw_content_is_fatal() {
        let config = Arc::new(Config::from_env());
        let queues = crate::workflow::stage_config(&config, "embedding").unwrap();
        let processor = EmbeddingProcessor::new(config, queues).unwrap();

        let payload = serde_json::to_value(content(None, Some("summary"))).unwrap();
        let err = processor.process(payload).await.unwrap_err();
        assert!(matches!(
            crate::error::as_processing_error(&err),
            Some(ProcessingError::Processing(_))
        ));
    }
}
