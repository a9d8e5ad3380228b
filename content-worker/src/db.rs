use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::ProcessingError;
use crate::models::{Content, ContentType};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Nested metadata block of an insert, as the content store expects it.
#[derive(Debug, Serialize)]
struct InsertMetadata<'a> {
    canonical_url: Option<&'a str>,
    keywords: Option<&'a [String]>,
}

/// Insert payload for `POST /contents`.
#[derive(Debug, Serialize)]
struct InsertContent<'a> {
    url: &'a str,
    content_type: ContentType,
    title: Option<&'a str>,
    raw_content: Option<&'a str>,
    description: Option<&'a str>,
    image_url: Option<&'a str>,
    summary: Option<&'a str>,
    metadata: InsertMetadata<'a>,
    content_id: Option<&'a str>,
}

impl<'a> InsertContent<'a> {
    fn from_content(content: &'a Content) -> Self {
        InsertContent {
            url: &content.url,
            content_type: content.content_type,
            title: content.title.as_deref(),
            raw_content: content.raw_content.as_deref(),
            description: content.description.as_deref(),
            image_url: content.image_url.as_deref(),
            summary: content.summary.as_deref(),
            metadata: InsertMetadata {
                canonical_url: content.canonical_url.as_deref(),
                keywords: content.keywords.as_deref(),
            },
            content_id: (!content.content_id.is_empty()).then_some(content.content_id.as_str()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckUrlResponse {
    #[serde(default)]
    exists: bool,
}

/// RPC wrapper around the relational content store. Writes are
/// insert-on-new; the existence check keys deduplication by URL.
#[derive(Clone)]
pub struct ContentStore {
    client: reqwest::Client,
    base_url: String,
}

impl ContentStore {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(ContentStore {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Checks whether a record keyed by this URL already exists.
    pub async fn check_url_exists(&self, url: &str) -> Result<bool, ProcessingError> {
        let response = self
            .client
            .post(format!("{}/contents/check_url", self.base_url))
            .json(&serde_json::json!({"url": url}))
            .send()
            .await
            .map_err(|e| {
                error!("Error checking URL existence: {}", e);
                ProcessingError::Processing(format!("Error checking URL existence: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ProcessingError::Processing(format!(
                "Error checking URL existence: status {}",
                response.status()
            )));
        }

        let body: CheckUrlResponse = response.json().await.map_err(|e| {
            ProcessingError::Processing(format!("Error decoding check_url response: {}", e))
        })?;
        Ok(body.exists)
    }

    /// Inserts the full record. The store keys by `url`/`content_id`, so a
    /// redelivered insert of the same record is a no-op on its side.
    pub async fn insert_content(
        &self,
        content: &Content,
    ) -> Result<serde_json::Value, ProcessingError> {
        let payload = InsertContent::from_content(content);

        let response = self
            .client
            .post(format!("{}/contents", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!("Error inserting content to DB: {}", e);
                ProcessingError::Processing(format!("Error inserting content to DB: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ProcessingError::Processing(format!(
                "Error inserting content to DB: status {}",
                response.status()
            )));
        }

        let body = response.json().await.map_err(|e| {
            ProcessingError::Processing(format!("Error decoding insert response: {}", e))
        })?;
        debug!("Inserted content record for {}", content.url);
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentStatus, ContentType};

    fn sample_content() -> Content {
        Content {
            content_id: "abc-123".to_string(),
            url: "https://example.com/a".to_string(),
            content_type: ContentType::WebArticle,
            status: ContentStatus::Summarized,
            title: Some("Title".to_string()),
            description: None,
            image_url: None,
            canonical_url: Some("https://example.com/a".to_string()),
            keywords: Some(vec!["rust".to_string()]),
            raw_content: Some("body".to_string()),
            summary: Some("summary".to_string()),
            source: None,
        }
    }

    #[test]
    fn test_insert_payload_nests_metadata() {
        let content = sample_content();
        let payload = InsertContent::from_content(&content);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["url"], "https://example.com/a");
        assert_eq!(json["content_type"], "web_article");
        assert_eq!(json["metadata"]["canonical_url"], "https://example.com/a");
        assert_eq!(json["metadata"]["keywords"][0], "rust");
        assert_eq!(json["content_id"], "abc-123");
    }

    #[test]
    fn test_insert_payload_omits_blank_content_id() {
        let mut content = sample_content();
        content.content_id = String::new();
        let json = serde_json::to_value(InsertContent::from_content(&content)).unwrap();
        assert!(json["content_id"].is_null());
    }
}
