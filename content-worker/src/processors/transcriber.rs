use std::sync::Arc;

use async_trait::async_trait;
use rabbitmq::{Processor, ProcessorError};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::config::Config;
use crate::error::ProcessingError;
use crate::models::{Content, ContentStatus};
use crate::workflow::ProcessorConfig;

const TIMEDTEXT_URL: &str = "https://www.youtube.com/api/timedtext";
const VIDEOS_URL: &str = "https://www.googleapis.com/youtube/v3/videos";
const FALLBACK_IMAGE: &str = "No Image Available";

/// Pulls the 11-character video id out of the usual YouTube URL shapes.
pub(crate) fn extract_video_id(url: &str) -> Option<String> {
    let pattern =
        Regex::new(r"(?:v=|youtu\.be/|/embed/|/shorts/|/live/)([A-Za-z0-9_-]{11})").unwrap();
    pattern
        .captures(url)
        .map(|captures| captures[1].to_string())
}

#[derive(Debug, Deserialize)]
struct TimedText {
    #[serde(default)]
    events: Vec<TimedTextEvent>,
}

#[derive(Debug, Deserialize)]
struct TimedTextEvent {
    #[serde(default)]
    segs: Option<Vec<TimedTextSegment>>,
}

#[derive(Debug, Deserialize)]
struct TimedTextSegment {
    #[serde(default)]
    utf8: String,
}

/// Concatenates caption segments in document order, one caption per line.
fn concatenate_transcript(timedtext: &TimedText) -> String {
    timedtext
        .events
        .iter()
        .filter_map(|event| event.segs.as_ref())
        .map(|segs| {
            segs.iter()
                .map(|segment| segment.utf8.as_str())
                .collect::<String>()
        })
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    snippet: VideoSnippet,
}

#[derive(Debug, Deserialize)]
struct VideoSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    #[serde(default)]
    standard: Option<Thumbnail>,
    #[serde(default)]
    high: Option<Thumbnail>,
    #[serde(default)]
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

fn best_thumbnail(thumbnails: &Thumbnails) -> String {
    thumbnails
        .standard
        .as_ref()
        .or(thumbnails.high.as_ref())
        .or(thumbnails.default.as_ref())
        .map(|thumbnail| thumbnail.url.clone())
        .unwrap_or_else(|| FALLBACK_IMAGE.to_string())
}

/// Transcription stage for YouTube submissions: caption track plus snippet
/// metadata, with the URL rewritten to its canonical watch form.
pub struct TranscriberProcessor {
    config: Arc<Config>,
    queues: ProcessorConfig,
    http: reqwest::Client,
}

impl TranscriberProcessor {
    pub fn new(config: Arc<Config>, queues: ProcessorConfig) -> anyhow::Result<Self> {
        Ok(TranscriberProcessor {
            config,
            queues,
            http: reqwest::Client::new(),
        })
    }

    async fn fetch_transcript(&self, video_id: &str) -> Result<String, ProcessingError> {
        let response = self
            .http
            .get(TIMEDTEXT_URL)
            .query(&[("v", video_id), ("lang", "en"), ("fmt", "json3")])
            .send()
            .await
            .map_err(|e| {
                ProcessingError::Processing(format!("Error fetching transcript: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ProcessingError::Processing(format!(
                "Error fetching transcript: status {}",
                response.status()
            )));
        }

        let body = response.text().await.map_err(|e| {
            ProcessingError::Processing(format!("Error reading transcript body: {}", e))
        })?;
        let timedtext: TimedText = serde_json::from_str(&body).map_err(|e| {
            ProcessingError::Processing(format!("Error parsing transcript: {}", e))
        })?;

        let transcript = concatenate_transcript(&timedtext);
        if transcript.is_empty() {
            return Err(ProcessingError::Processing(format!(
                "No caption track available for video {}",
                video_id
            )));
        }
        Ok(transcript)
    }

    async fn fetch_video_details(&self, video_id: &str) -> Result<VideoSnippet, ProcessingError> {
        let response = self
            .http
            .get(VIDEOS_URL)
            .query(&[
                ("part", "snippet"),
                ("id", video_id),
                ("key", self.config.youtube_api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                ProcessingError::Processing(format!("Error fetching video details: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ProcessingError::Processing(format!(
                "Error fetching video details: status {}",
                response.status()
            )));
        }

        let videos: VideosResponse = response.json().await.map_err(|e| {
            ProcessingError::Processing(format!("Error parsing video details: {}", e))
        })?;

        videos
            .items
            .into_iter()
            .next()
            .map(|item| item.snippet)
            .ok_or_else(|| {
                ProcessingError::Processing(format!("Failed to fetch video details for {}", video_id))
            })
    }
}

#[async_trait]
impl Processor for TranscriberProcessor {
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
                "transcriber expects classified content, got {}",
                input.status.as_str()
            ))
            .into());
        }

        info!("Transcribing: {}", input.url);
        let video_id = extract_video_id(&input.url).ok_or_else(|| {
            ProcessingError::Processing(format!("Failed to get youtube id from {}", input.url))
        })?;

        let transcript = self.fetch_transcript(&video_id).await?;

        info!("Fetching video details for youtube id: {}", video_id);
        let snippet = self.fetch_video_details(&video_id).await?;

        input.url = format!("https://www.youtube.com/watch?v={}", video_id);
        input.raw_content = Some(transcript);
        input.title = Some(snippet.title);
        input.description = Some(snippet.description);
        input.image_url = Some(best_thumbnail(&snippet.thumbnails));
        input.status = ContentStatus::Transcribed;

        info!("Transcribing completed for: {}", input.url);
        Ok((
            self.config.summary_queue.clone(),
            serde_json::to_value(input)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_video_id_from_common_forms() {
        let id = "dQw4w9WgXcQ";
        let urls = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?v=dQw4w9WgXcQ&t=42s",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
        ];
        for url in urls {
            assert_eq!(extract_video_id(url).as_deref(), Some(id), "for {}", url);
        }
    }

    #[test]
    fn test_extract_video_id_rejects_non_video_urls() {
        assert!(extract_video_id("https://example.com/watch?x=1").is_none());
        assert!(extract_video_id("https://www.youtube.com/feed/history").is_none());
    }

    #[test]
    fn test_transcript_concatenation_keeps_document_order() {
        let body = serde_json::json!({
            "events": [
                {"segs": [{"utf8": "first "}, {"utf8": "caption"}]},
                {"tStartMs": 100},
                {"segs": [{"utf8": "second caption"}]},
                {"segs": [{"utf8": "  "}]},
            ],
        });
        let timedtext: TimedText = serde_json::from_value(body).unwrap();
        assert_eq!(
            concatenate_transcript(&timedtext),
            "first caption\nsecond caption"
        );
    }

    #[test]
    fn test_thumbnail_preference_order() {
        let thumbnails: Thumbnails = serde_json::from_value(serde_json::json!({
            "high": {"url": "high.jpg"},
            "default": {"url": "default.jpg"},
        }))
        .unwrap();
        assert_eq!(best_thumbnail(&thumbnails), "high.jpg");

        let none: Thumbnails = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(best_thumbnail(&none), FALLBACK_IMAGE);
    }
}
