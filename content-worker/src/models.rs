use serde::{Deserialize, Serialize};

/// Closed set of content kinds the classifier can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    WebArticle,
    Publication,
    YoutubeVideo,
    Bookmark,
    Unknown,
}

/// Pipeline position of a record. Declaration order follows the graph, so the
/// derived ordering can assert that a stage only ever advances the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Submitted,
    Classified,
    Transcribed,
    Crawled,
    Summarized,
    Embedded,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Submitted => "submitted",
            ContentStatus::Classified => "classified",
            ContentStatus::Transcribed => "transcribed",
            ContentStatus::Crawled => "crawled",
            ContentStatus::Summarized => "summarized",
            ContentStatus::Embedded => "embedded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramSource {
    pub chat_id: String,
    pub message_id: String,
}

/// Where a submission came from, carried verbatim end-to-end so the notifier
/// can address its reply. Externally tagged: `{"telegram": {...}}` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRef {
    Telegram(TelegramSource),
}

pub const SUBMITTED_CONTENT_MAX_LEN: usize = 10_000;

/// The envelope published by the submission gateway; never mutated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedContent {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRef>,
}

impl SubmittedContent {
    pub fn validate(&self) -> Result<(), String> {
        let len = self.content.chars().count();
        if len == 0 {
            return Err("content must not be empty".to_string());
        }
        if len > SUBMITTED_CONTENT_MAX_LEN {
            return Err(format!(
                "content exceeds {} characters",
                SUBMITTED_CONTENT_MAX_LEN
            ));
        }
        Ok(())
    }
}

/// Structured output of the classification model.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifiedContent {
    pub content_type: ContentType,
    #[serde(default)]
    pub url: Option<String>,
}

/// Metadata block returned by the crawl service alongside the page markdown.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub canonical_url: Option<String>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
}

/// The canonical record flowing through every stage after classification.
/// `content_id` is assigned once by the classifier and never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub content_id: String,
    pub url: String,
    pub content_type: ContentType,
    pub status: ContentStatus,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub canonical_url: Option<String>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub raw_content: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub source: Option<SourceRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Info,
    Error,
}

/// Progress report published on the notify queue, independent of the main
/// pipeline flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub url: String,
    pub status: ContentStatus,
    pub notification_type: NotificationType,
    #[serde(default)]
    pub source: Option<SourceRef>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_advances_along_the_graph() {
        assert!(ContentStatus::Submitted < ContentStatus::Classified);
        assert!(ContentStatus::Classified < ContentStatus::Transcribed);
        assert!(ContentStatus::Classified < ContentStatus::Crawled);
        assert!(ContentStatus::Transcribed < ContentStatus::Summarized);
        assert!(ContentStatus::Crawled < ContentStatus::Summarized);
        assert!(ContentStatus::Summarized < ContentStatus::Embedded);
    }

    #[test]
    fn test_enums_are_snake_case_on_the_wire() {
        assert_eq!(
            serde_json::to_string(&ContentType::YoutubeVideo).unwrap(),
            "\"youtube_video\""
        );
        assert_eq!(
            serde_json::to_string(&ContentStatus::Summarized).unwrap(),
            "\"summarized\""
        );
        let parsed: ContentType = serde_json::from_str("\"web_article\"").unwrap();
        assert_eq!(parsed, ContentType::WebArticle);
    }

    #[test]
    fn test_source_ref_is_externally_tagged() {
        let source = SourceRef::Telegram(TelegramSource {
            chat_id: "42".to_string(),
            message_id: "7".to_string(),
        });
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["telegram"]["chat_id"], "42");
        assert_eq!(json["telegram"]["message_id"], "7");

        let round: SourceRef = serde_json::from_value(json).unwrap();
        assert_eq!(round, source);
    }

    #[test]
    fn test_submitted_content_length_bounds() {
        let ok = SubmittedContent {
            content: "https://example.com".to_string(),
            source: None,
        };
        assert!(ok.validate().is_ok());

        let empty = SubmittedContent {
            content: String::new(),
            source: None,
        };
        assert!(empty.validate().is_err());

        let oversized = SubmittedContent {
            content: "x".repeat(SUBMITTED_CONTENT_MAX_LEN + 1),
            source: None,
        };
        assert!(oversized.validate().is_err());
    }

    #[test]
    fn test_content_round_trip_preserves_source() {
        let content = Content {
            content_id: "id-1".to_string(),
            url: "https://example.com/a".to_string(),
            content_type: ContentType::WebArticle,
            status: ContentStatus::Classified,
            title: None,
            description: None,
            image_url: None,
            canonical_url: None,
            keywords: None,
            raw_content: None,
            summary: None,
            source: Some(SourceRef::Telegram(TelegramSource {
                chat_id: "1".to_string(),
                message_id: "2".to_string(),
            })),
        };
        let value = serde_json::to_value(&content).unwrap();
        let round: Content = serde_json::from_value(value).unwrap();
        assert_eq!(round.source, content.source);
        assert_eq!(round.content_id, content.content_id);
    }
}
