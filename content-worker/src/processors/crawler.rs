use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rabbitmq::{Processor, ProcessorError};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};

use crate::config::Config;
use crate::error::ProcessingError;
use crate::llm::{gemini_generate, openai_chat, unwrap_first_codeblock};
use crate::models::{Content, ContentStatus, Metadata};
use crate::workflow::ProcessorConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

const CLEANER_GEMINI_MODEL: &str = "gemini-1.5-flash-002";
const CLEANER_OPENAI_MODEL: &str = "gpt-4o-mini";
const CLEANER_MAX_TOKENS: u32 = 4096;

const CLEANER_PROMPT: &str = "\
You are a professional in web scraping and cleaning markdown. You excel at identifying irrelevant elements and extracting the core content cleanly.

Clean the provided markdown content from a website by removing irrelevant elements such as navigation and headers while maintaining the main content, language, images, and links. Ensure that the output is in markdown format only.

# Steps

1. **Identify Main Content**: Locate the sections of the markdown that correspond to the primary content based on context and relevance.
2. **Remove Irrelevant Sections**: Identify and eliminate any markdown portions related to navigation, headers, footers, or any non-essential sections that do not contribute to the main content.
3. **Preserve Language and Images**: Ensure that the main textual content remains intact, preserving the original language and all image references.
4. **Perform Quality Check**: Review the cleaned markdown to ensure that only relevant content is maintained, and the markdown format is correctly preserved.

# Output Format

- The output should be pure markdown format.
- Only relevant main content, language, and images should be included.
- Ensure there is no extraneous or irrelevant information in the output.";

#[derive(Debug, Deserialize)]
struct CrawlResponse {
    content: String,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Deserialize)]
struct CrawlErrorBody {
    #[serde(default)]
    detail: Option<String>,
}

/// Fetch-and-clean stage for everything the classifier routed to the crawl
/// queue.
pub struct CrawlerProcessor {
    config: Arc<Config>,
    queues: ProcessorConfig,
    http: reqwest::Client,
}

impl CrawlerProcessor {
    pub fn new(config: Arc<Config>, queues: ProcessorConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()?;
        Ok(CrawlerProcessor {
            config,
            queues,
            http,
        })
    }

    /// Asks the headless-browser service for the page as markdown plus its
    /// metadata block.
    async fn crawl_content(&self, url: &str) -> Result<(String, Metadata), ProcessingError> {
        info!("Starting content crawling: {}", url);

        let response = self
            .http
            .post(format!("{}/crawl", self.config.crawl_service_url))
            .json(&serde_json::json!({"url": url}))
            .send()
            .await
            .map_err(|e| {
                error!("Network error while crawling content: {}", e);
                ProcessingError::Processing(format!("Network error while crawling content: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<CrawlErrorBody>(&body)
                .ok()
                .and_then(|parsed| parsed.detail)
                .unwrap_or_else(|| {
                    if body.is_empty() {
                        status.to_string()
                    } else {
                        body.clone()
                    }
                });
            error!("Crawl service error: {} (Status: {})", detail, status);
            return Err(ProcessingError::Processing(format!(
                "Crawl service failed: {} (Status: {})",
                detail, status
            )));
        }

        let crawled: CrawlResponse = response.json().await.map_err(|e| {
            ProcessingError::Processing(format!("Invalid response format from crawl service: {}", e))
        })?;
        Ok((crawled.content, crawled.metadata))
    }

    /// Strips navigation and boilerplate from the crawled markdown. Gemini
    /// first, OpenAI as fallback; if both fail the original markdown is used.
    async fn clean_markdown(&self, markdown: &str) -> String {
        let cleaned = match gemini_generate(
            &self.http,
            &self.config.gemini_api_key,
            CLEANER_GEMINI_MODEL,
            CLEANER_PROMPT,
            markdown,
            CLEANER_MAX_TOKENS,
        )
        .await
        {
            Ok(text) => text,
            Err(gemini_err) => {
                info!("Gemini failed with error: {}. Falling back to OpenAI.", gemini_err);
                match openai_chat(
                    &self.http,
                    &self.config.openai_api_key,
                    CLEANER_OPENAI_MODEL,
                    CLEANER_PROMPT,
                    markdown,
                    CLEANER_MAX_TOKENS,
                    false,
                )
                .await
                {
                    Ok(text) => text,
                    Err(openai_err) => {
                        info!(
                            "OpenAI failed with error: {}. Returning the original markdown.",
                            openai_err
                        );
                        return markdown.to_string();
                    }
                }
            }
        };

        unwrap_first_codeblock(&cleaned)
    }
}

#[async_trait]
impl Processor for CrawlerProcessor {
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
        if input.status != ContentStatus::Classified {
            return Err(ProcessingError::Validation(format!(
                "crawler expects classified content, got {}",
                input.status.as_str()
            ))
            .into());
        }

        let (markdown, metadata) = self.crawl_content(&input.url).await?;
        let cleaned = self.clean_markdown(&markdown).await;

        input.raw_content = Some(cleaned);
        input.title = metadata.title;
        input.description = metadata.description;
        input.image_url = metadata.image_url;
        input.canonical_url = metadata.canonical_url;
        input.keywords = metadata.keywords;
        input.status = ContentStatus::Crawled;

        info!("Content crawled successfully: {}", input.url);
        Ok((
            self.config.summary_queue.clone(),
            serde_json::to_value(input)?,
        ))
    }

    async fn handle_error(&self, error: &ProcessorError, content: Option<&Value>) -> bool {
        error!("Error in crawler: {}", error);
        if let Some(content) = content {
            error!("Failed content: {}", content);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_wrong_status() {
        let config = Arc::new(Config::from_env());
        let queues = crate::workflow::stage_config(&config, "crawler").unwrap();
        let processor = CrawlerProcessor::new(config, queues).unwrap();

        let payload = serde_json::json!({
            "content_id": "id-1",
            "url": "https://example.com/a",
            "content_type": "web_article",
            "status": "summarized",
        });
        let err = processor.process(payload).await.unwrap_err();
        let domain = crate::error::as_processing_error(&err).unwrap();
        assert!(matches!(domain, ProcessingError::Validation(_)));
    }

    #[test]
    fn test_crawl_response_parsing() {
        let body = serde_json::json!({
            "content": "# Page\n\nText",
            "metadata": {
                "title": "Page",
                "canonical_url": "https://example.com/page",
            },
        });
        let parsed: CrawlResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.content, "# Page\n\nText");
        assert_eq!(parsed.metadata.title.as_deref(), Some("Page"));
        assert_eq!(
            parsed.metadata.canonical_url.as_deref(),
            Some("https://example.com/page")
        );
        assert!(parsed.metadata.description.is_none());
    }
}
