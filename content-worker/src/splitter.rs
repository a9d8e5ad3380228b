/// Chunking for the embedding stage: fixed-size windows with overlap, biased
/// towards breaking on paragraph, newline, then space boundaries so chunks
/// stay readable. Chunks are verbatim substrings of the input; no whitespace
/// is rewritten.
#[derive(Debug, Clone, Copy)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        TextSplitter {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    /// Splits `text` into chunks of at most `chunk_size` characters, with
    /// consecutive chunks sharing roughly `chunk_overlap` characters.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }

        // Work in char offsets; slice boundaries must stay valid UTF-8.
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total_chars = offsets.len() - 1;

        if total_chars <= self.chunk_size {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < total_chars {
            let hard_end = (start + self.chunk_size).min(total_chars);
            let end = if hard_end < total_chars {
                self.break_point(text, &offsets, start, hard_end)
            } else {
                hard_end
            };

            chunks.push(text[offsets[start]..offsets[end]].to_string());

            if end == total_chars {
                break;
            }
            start = end.saturating_sub(self.chunk_overlap).max(start + 1);
        }

        chunks
    }

    /// Picks the break position within `(start, hard_end]`, preferring a
    /// paragraph break, then a newline, then a space, as long as the break
    /// does not shrink the chunk below half its size.
    fn break_point(&self, text: &str, offsets: &[usize], start: usize, hard_end: usize) -> usize {
        let window = &text[offsets[start]..offsets[hard_end]];
        let min_len = self.chunk_size / 2;

        for separator in ["\n\n", "\n", " "] {
            if let Some(byte_pos) = window.rfind(separator) {
                let sep_end = byte_pos + separator.len();
                let char_len = window[..sep_end].chars().count();
                if char_len > min_len {
                    return start + char_len;
                }
            }
        }
        hard_end
    }
}

/// A chunk tagged with the provenance the vector store needs.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DocumentChunk {
    pub text: String,
    pub source: String,
    pub content_id: String,
}

/// Splits each `(text, source, content_id)` document and flattens the result
/// in document order.
pub fn split_documents(
    splitter: &TextSplitter,
    documents: &[(String, String, String)],
) -> Vec<DocumentChunk> {
    documents
        .iter()
        .flat_map(|(text, source, content_id)| {
            splitter
                .split(text)
                .into_iter()
                .map(move |chunk| DocumentChunk {
                    text: chunk,
                    source: source.clone(),
                    content_id: content_id.clone(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        let splitter = TextSplitter::new(500, 50);
        assert_eq!(splitter.split("short text"), vec!["short text"]);
        assert!(splitter.split("").is_empty());
    }

    #[test]
    fn test_chunks_respect_size_bound() {
        let splitter = TextSplitter::new(500, 50);
        let text = "word ".repeat(400);
        for chunk in splitter.split(&text) {
            assert!(chunk.chars().count() <= 500);
        }
    }

    #[test]
    fn test_chunk_count_covers_full_text() {
        let splitter = TextSplitter::new(500, 50);
        let text = "x".repeat(2600);
        let chunks = splitter.split(&text);
        // At least ceil(len / chunk_size) chunks are needed to cover the text.
        assert!(chunks.len() >= 6);
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let splitter = TextSplitter::new(100, 20);
        let text = "lorem ipsum dolor sit amet ".repeat(40);
        let chunks = splitter.split(&text);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let tail: String = pair[0].chars().rev().take(10).collect::<String>();
            let tail: String = tail.chars().rev().collect();
            assert!(
                pair[1].contains(&tail),
                "expected overlap between consecutive chunks"
            );
        }
    }

    #[test]
    fn test_chunks_are_substrings() {
        let splitter = TextSplitter::new(120, 20);
        let text = "Paragraph one.\n\nParagraph two is a bit longer than the first one.\n\nAnd a third paragraph with some extra words to force splitting.";
        for chunk in splitter.split(text) {
            assert!(text.contains(&chunk), "chunk must be a verbatim substring");
        }
    }

    #[test]
    fn test_prefers_breaking_at_paragraphs() {
        let splitter = TextSplitter::new(80, 0);
        let text = format!("{}\n\n{}", "a".repeat(60), "b".repeat(60));
        let chunks = splitter.split(&text);
        assert!(chunks[0].starts_with(&"a".repeat(60)));
        assert!(chunks[1].starts_with('b') || chunks[1].trim_start().starts_with('b'));
    }

    #[test]
    fn test_split_documents_tags_every_chunk() {
        let splitter = TextSplitter::new(50, 5);
        let docs = vec![
            (
                "alpha ".repeat(30),
                "https://example.com/a".to_string(),
                "id-1".to_string(),
            ),
            (
                "beta".to_string(),
                "https://example.com/a".to_string(),
                "id-1".to_string(),
            ),
        ];
        let chunks = split_documents(&splitter, &docs);
        assert!(chunks.len() > 2);
        assert!(chunks
            .iter()
            .all(|c| c.content_id == "id-1" && c.source == "https://example.com/a"));
    }
}
