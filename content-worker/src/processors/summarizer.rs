use std::sync::Arc;

use async_trait::async_trait;
use rabbitmq::{Processor, ProcessorError};
use serde_json::Value;
use tracing::info;

use crate::config::Config;
use crate::db::ContentStore;
use crate::error::{as_processing_error, ProcessingError};
use crate::llm::{gemini_generate, openai_chat, unwrap_first_codeblock};
use crate::models::{Content, ContentStatus, ContentType, NotificationMessage, NotificationType};
use crate::notify::Notifier;
use crate::urls;
use crate::workflow::ProcessorConfig;

const SUMMARY_GEMINI_MODEL: &str = "gemini-1.5-flash";
const SUMMARY_OPENAI_MODEL: &str = "gpt-4o-mini";
const GEMINI_MAX_TOKENS: u32 = 8192;
const OPENAI_MAX_TOKENS: u32 = 1048;

const PUBLICATION_PROMPT: &str = "\
You are an excellent academic paper reviewer. You conduct paper summarization on the full paper text provided by the user, with following instructions:

REVIEW INSTRUCTION:

**Summary of Academic Paper's Technical Approach**

1. **Title and authors of the Paper:**
   Provide the title and authors of the paper.

2. **Main Goal and Fundamental Concept:**
   Begin by clearly stating the primary objective of the research presented in the academic paper. Describe the core idea or hypothesis that underpins the study in simple, accessible language.

3. **Technical Approach:**
   Provide a detailed explanation of the methodology used in the research. Focus on describing how the study was conducted, including any specific techniques, models, or algorithms employed. Avoid delving into complex jargon or highly technical details that might obscure understanding.

4. **Distinctive Features:**
   Identify and elaborate on what sets this research apart from other studies in the same field. Highlight any novel techniques, unique applications, or innovative methodologies that contribute to its distinctiveness.

5. **Experimental Setup and Results:**
   Describe the experimental design and data collection process used in the study. Summarize the results obtained or key findings, emphasizing any significant outcomes or discoveries.

6. **Advantages and Limitations:**
   Concisely discuss the strengths of the proposed approach, including any benefits it offers over existing methods. Also, address its limitations or potential drawbacks, providing a balanced view of its efficacy and applicability.

7. **Conclusion:**
   Sum up the key points made about the paper's technical approach, its uniqueness, and its comparative advantages and limitations. Aim for clarity and succinctness in your summary.

OUTPUT INSTRUCTIONS:

1. Only use the headers provided in the instructions above.
2. Format your output in clear, human-readable Markdown.
3. Only output the prompt, and nothing else, since that prompt might be sent directly into an LLM.";

const DEFAULT_PROMPT: &str = "\
# IDENTITY and PURPOSE

You are an expert content summarizer. You take content in and output a Markdown formatted summary using the format below.

Take a deep breath and think step by step about how to best accomplish this goal using the following steps.

# OUTPUT SECTIONS

- Combine all of your understanding of the content into a single, 20-word sentence in a section called ONE SENTENCE SUMMARY:.

- Output the 10 most important points of the content as a list with no more than 15 words per point into a section called MAIN POINTS:.

- Output a list of the 5 best takeaways from the content in a section called TAKEAWAYS:.

# OUTPUT INSTRUCTIONS

- Create the output using the formatting above.
- You only output human readable Markdown.
- Output numbered lists, not bullets.
- Do not output warnings or notes, just the requested sections.
- Do not repeat items in the output sections.
- Do not start items with the same opening words.";

fn system_prompt_for(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::Publication => PUBLICATION_PROMPT,
        _ => DEFAULT_PROMPT,
    }
}

/// Recomputes the deduplication key: youtube URLs are already canonical, for
/// everything else the crawl-reported canonical URL wins over the cleaned
/// submission URL. An empty key falls back to the record's URL.
pub(crate) fn dedup_key(
    content_type: ContentType,
    canonical_url: Option<&str>,
    cleaned_url: &str,
    url: &str,
) -> String {
    let key = if content_type == ContentType::YoutubeVideo {
        url
    } else {
        match canonical_url {
            Some(canonical) if !canonical.is_empty() => canonical,
            _ => cleaned_url,
        }
    };
    if key.is_empty() {
        url.to_string()
    } else {
        key.to_string()
    }
}

/// Summarization stage: dedup gate, model summary, canonical record write,
/// progress notification.
pub struct SummarizerProcessor {
    config: Arc<Config>,
    queues: ProcessorConfig,
    http: reqwest::Client,
    store: ContentStore,
    notifier: Notifier,
}

impl SummarizerProcessor {
    pub fn new(config: Arc<Config>, queues: ProcessorConfig) -> anyhow::Result<Self> {
        let store = ContentStore::new(&config.content_store_url)?;
        let notifier = Notifier::new(&config);
        Ok(SummarizerProcessor {
            http: reqwest::Client::new(),
            store,
            notifier,
            config,
            queues,
        })
    }

    /// Gemini first, OpenAI as fallback, empty string when both fail: a
    /// missing summary must not block the record from reaching the sinks.
    async fn summarize_content(&self, content: &Content) -> String {
        let raw_content = content.raw_content.as_deref().unwrap_or_default();
        let prompt = system_prompt_for(content.content_type);

        let summary = match gemini_generate(
            &self.http,
            &self.config.gemini_api_key,
            SUMMARY_GEMINI_MODEL,
            prompt,
            raw_content,
            GEMINI_MAX_TOKENS,
        )
        .await
        {
            Ok(text) => text,
            Err(gemini_err) => {
                info!("Gemini failed with error: {}. Falling back to OpenAI.", gemini_err);
                match openai_chat(
                    &self.http,
                    &self.config.openai_api_key,
                    SUMMARY_OPENAI_MODEL,
                    prompt,
                    raw_content,
                    OPENAI_MAX_TOKENS,
                    false,
                )
                .await
                {
                    Ok(text) => text,
                    Err(openai_err) => {
                        info!("OpenAI failed with error: {}.", openai_err);
                        info!("Both models failed. Continuing without a summary.");
                        return String::new();
                    }
                }
            }
        };

        unwrap_first_codeblock(&summary)
    }
}

#[async_trait]
impl Processor for SummarizerProcessor {
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
        if input.status != ContentStatus::Crawled && input.status != ContentStatus::Transcribed {
            return Err(ProcessingError::Validation(format!(
                "summarizer expects crawled or transcribed content, got {}",
                input.status.as_str()
            ))
            .into());
        }

        info!("Starting content summarization: {}", input.url);

        let cleaned = if input.content_type == ContentType::YoutubeVideo {
            input.url.clone()
        } else {
            urls::clean_url(&self.http, &input.url).await
        };
        let key = dedup_key(
            input.content_type,
            input.canonical_url.as_deref(),
            &cleaned,
            &input.url,
        );

        if self.store.check_url_exists(&key).await? {
            info!("URL already exists in the database: {}", key);
            self.notifier
                .notify(&NotificationMessage {
                    url: input.url.clone(),
                    status: input.status,
                    notification_type: NotificationType::Info,
                    source: input.source.clone(),
                    message: "URL already exists in the database.".to_string(),
                })
                .await?;
            return Err(ProcessingError::AlreadyExists(key).into());
        }

        let summary = self.summarize_content(&input).await;
        input.summary = Some(summary.clone());
        input.status = ContentStatus::Summarized;

        self.store.insert_content(&input).await?;

        self.notifier
            .notify(&NotificationMessage {
                url: input.url.clone(),
                status: input.status,
                notification_type: NotificationType::Info,
                source: input.source.clone(),
                message: format!("Content has been summarized successfully.\n{}", summary),
            })
            .await?;

        Ok((
            self.config.embedding_queue.clone(),
            serde_json::to_value(input)?,
        ))
    }

    async fn handle_error(&self, error: &ProcessorError, _content: Option<&Value>) -> bool {
        match as_processing_error(error) {
            Some(ProcessingError::AlreadyExists(key)) => {
                info!("Content already exists, dropping message: {}", key);
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
    fn test_dedup_key_prefers_canonical_for_articles() {
        assert_eq!(
            dedup_key(
                ContentType::WebArticle,
                Some("https://example.com/canonical"),
                "https://example.com/cleaned",
                "https://example.com/original",
            ),
            "https://example.com/canonical"
        );
    }

    #[test]
    fn test_dedup_key_falls_back_to_cleaned_url() {
        assert_eq!(
            dedup_key(
                ContentType::WebArticle,
                None,
                "https://example.com/cleaned",
                "https://example.com/original",
            ),
            "https://example.com/cleaned"
        );
        assert_eq!(
            dedup_key(
                ContentType::Bookmark,
                Some(""),
                "https://example.com/cleaned",
                "https://example.com/original",
            ),
            "https://example.com/cleaned"
        );
    }

    #[test]
    fn test_dedup_key_keeps_youtube_url() {
        assert_eq!(
            dedup_key(
                ContentType::YoutubeVideo,
                Some("https://example.com/canonical"),
                "https://example.com/cleaned",
                "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            ),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
    }

    #[test]
    fn test_dedup_key_empty_everything_uses_original() {
        assert_eq!(
            dedup_key(ContentType::WebArticle, None, "", "https://example.com/a"),
            "https://example.com/a"
        );
    }

    #[test]
    fn test_publications_get_the_review_prompt() {
        assert!(system_prompt_for(ContentType::Publication).contains("academic paper reviewer"));
        assert!(system_prompt_for(ContentType::WebArticle).contains("content summarizer"));
        assert!(system_prompt_for(ContentType::YoutubeVideo).contains("content summarizer"));
    }
}
