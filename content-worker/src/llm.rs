use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::error::ProcessingError;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Serialize)]
struct OpenAiChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChatChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

/// One round-trip through the OpenAI chat completions API. With `json_output`
/// the model is forced into JSON-object mode so the reply parses directly
/// into a typed value.
pub async fn openai_chat(
    client: &reqwest::Client,
    api_key: &str,
    model: &str,
    system_prompt: &str,
    user_content: &str,
    max_tokens: u32,
    json_output: bool,
) -> Result<String, ProcessingError> {
    if api_key.is_empty() {
        return Err(ProcessingError::Processing(
            "OPENAI_API_KEY is empty".to_string(),
        ));
    }

    let request = OpenAiChatRequest {
        model,
        messages: vec![
            OpenAiChatMessage {
                role: "system",
                content: system_prompt,
            },
            OpenAiChatMessage {
                role: "user",
                content: user_content,
            },
        ],
        temperature: 1.0,
        max_tokens,
        response_format: json_output.then(|| json!({"type": "json_object"})),
    };

    let response = client
        .post(OPENAI_CHAT_URL)
        .bearer_auth(api_key)
        .json(&request)
        .send()
        .await
        .map_err(|e| ProcessingError::Processing(format!("openai request failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(ProcessingError::Processing(format!(
            "openai non-success status: {}",
            response.status()
        )));
    }

    let data: OpenAiChatResponse = response
        .json()
        .await
        .map_err(|e| ProcessingError::Processing(format!("openai json decode: {}", e)))?;

    data.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| ProcessingError::Processing("openai returned no content".to_string()))
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

/// One round-trip through the Gemini `generateContent` REST API.
pub async fn gemini_generate(
    client: &reqwest::Client,
    api_key: &str,
    model: &str,
    system_prompt: &str,
    user_content: &str,
    max_output_tokens: u32,
) -> Result<String, ProcessingError> {
    if api_key.is_empty() {
        return Err(ProcessingError::Processing(
            "GEMINI_API_KEY is empty".to_string(),
        ));
    }

    let body = json!({
        "system_instruction": {"parts": [{"text": system_prompt}]},
        "contents": [{"role": "user", "parts": [{"text": user_content}]}],
        "generationConfig": {
            "temperature": 1.0,
            "topP": 0.95,
            "maxOutputTokens": max_output_tokens,
        },
    });

    let endpoint = format!("{}/{}:generateContent", GEMINI_BASE_URL, model);
    let response = client
        .post(&endpoint)
        .query(&[("key", api_key)])
        .json(&body)
        .send()
        .await
        .map_err(|e| ProcessingError::Processing(format!("gemini request failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(ProcessingError::Processing(format!(
            "gemini non-success status: {}",
            response.status()
        )));
    }

    let data: GeminiResponse = response
        .json()
        .await
        .map_err(|e| ProcessingError::Processing(format!("gemini json decode: {}", e)))?;

    let text = data
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(ProcessingError::Processing(
            "gemini returned no content".to_string(),
        ));
    }
    Ok(text)
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingsResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

/// Embeds a batch of texts, returning vectors in input order.
pub async fn openai_embeddings(
    client: &reqwest::Client,
    api_key: &str,
    model: &str,
    inputs: &[String],
) -> Result<Vec<Vec<f32>>, ProcessingError> {
    if api_key.is_empty() {
        return Err(ProcessingError::Processing(
            "OPENAI_API_KEY is empty".to_string(),
        ));
    }
    if inputs.is_empty() {
        return Ok(Vec::new());
    }

    let response = client
        .post(OPENAI_EMBEDDINGS_URL)
        .bearer_auth(api_key)
        .json(&json!({"model": model, "input": inputs}))
        .send()
        .await
        .map_err(|e| ProcessingError::Processing(format!("embeddings request failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(ProcessingError::Processing(format!(
            "embeddings non-success status: {}",
            response.status()
        )));
    }

    let data: OpenAiEmbeddingsResponse = response
        .json()
        .await
        .map_err(|e| ProcessingError::Processing(format!("embeddings json decode: {}", e)))?;

    if data.data.len() != inputs.len() {
        warn!(
            "Embeddings count mismatch: requested {}, got {}",
            inputs.len(),
            data.data.len()
        );
        return Err(ProcessingError::Processing(
            "embeddings count mismatch".to_string(),
        ));
    }

    let mut vectors = data.data;
    vectors.sort_by_key(|entry| entry.index);
    Ok(vectors.into_iter().map(|entry| entry.embedding).collect())
}

/// Unwraps a single outermost code fence, if present. Models occasionally
/// wrap the whole reply in ``` fences even when asked for plain markdown.
pub fn unwrap_first_codeblock(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let Some(first_newline) = trimmed.find('\n') else {
        return trimmed.to_string();
    };
    let rest = &trimmed[first_newline + 1..];
    let Some(closing) = rest.rfind("```") else {
        return trimmed.to_string();
    };

    rest[..closing].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_plain_text_is_untouched() {
        assert_eq!(unwrap_first_codeblock("  hello world  "), "hello world");
    }

    #[test]
    fn test_unwrap_fenced_block() {
        let wrapped = "```markdown\n# Title\n\nBody text.\n```";
        assert_eq!(unwrap_first_codeblock(wrapped), "# Title\n\nBody text.");
    }

    #[test]
    fn test_unwrap_fence_without_language_tag() {
        let wrapped = "```\nplain\n```";
        assert_eq!(unwrap_first_codeblock(wrapped), "plain");
    }

    #[test]
    fn test_unclosed_fence_is_left_alone() {
        let wrapped = "```markdown\nno closing fence";
        assert_eq!(unwrap_first_codeblock(wrapped), wrapped);
    }
}
