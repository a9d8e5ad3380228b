use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error};

use crate::error::ProcessingError;
use crate::splitter::DocumentChunk;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct VectorMetadata<'a> {
    source: &'a str,
    content_id: &'a str,
}

#[derive(Debug, Serialize)]
struct VectorDocument<'a> {
    text: &'a str,
    embedding: &'a [f32],
    metadata: VectorMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct AddDocumentsRequest<'a> {
    documents: Vec<VectorDocument<'a>>,
}

/// RPC wrapper around the vector store. Documents are keyed by their
/// `content_id` metadata on the store side, so re-adding the same content is
/// idempotent there.
#[derive(Clone)]
pub struct VectorStore {
    client: reqwest::Client,
    base_url: String,
}

impl VectorStore {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(VectorStore {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Persists chunks with their embeddings into the named collection.
    pub async fn add_documents(
        &self,
        collection: &str,
        chunks: &[DocumentChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), ProcessingError> {
        if chunks.len() != embeddings.len() {
            return Err(ProcessingError::Processing(format!(
                "chunk/embedding count mismatch: {} vs {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let documents = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| VectorDocument {
                text: &chunk.text,
                embedding,
                metadata: VectorMetadata {
                    source: &chunk.source,
                    content_id: &chunk.content_id,
                },
            })
            .collect();

        let response = self
            .client
            .post(format!(
                "{}/collections/{}/documents",
                self.base_url, collection
            ))
            .json(&AddDocumentsRequest { documents })
            .send()
            .await
            .map_err(|e| {
                error!("Error writing to vector store: {}", e);
                ProcessingError::Processing(format!("Error writing to vector store: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ProcessingError::Processing(format!(
                "Error writing to vector store: status {}",
                response.status()
            )));
        }

        debug!(
            "Stored {} chunks in vector collection {}",
            chunks.len(),
            collection
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_payload_shape() {
        let chunk = DocumentChunk {
            text: "chunk text".to_string(),
            source: "https://example.com/a".to_string(),
            content_id: "id-9".to_string(),
        };
        let embedding = vec![0.25f32, -0.5];
        let request = AddDocumentsRequest {
            documents: vec![VectorDocument {
                text: &chunk.text,
                embedding: &embedding,
                metadata: VectorMetadata {
                    source: &chunk.source,
                    content_id: &chunk.content_id,
                },
            }],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["documents"][0]["text"], "chunk text");
        assert_eq!(json["documents"][0]["metadata"]["source"], "https://example.com/a");
        assert_eq!(json["documents"][0]["metadata"]["content_id"], "id-9");
        assert_eq!(json["documents"][0]["embedding"][1], -0.5);
    }
}
