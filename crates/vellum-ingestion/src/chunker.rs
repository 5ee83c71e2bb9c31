//! Hybrid document chunker: structural paragraph boundaries packed into
//! a token budget, oversized paragraphs split by word window.

use serde_json::Value;

use crate::models::{Chunk, Document};

/// Configuration for the chunker.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum tokens per chunk (embedding model input limit).
    pub max_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self { max_tokens: 512 }
    }
}

/// Chunk a converted document into bounded, ordered spans.
///
/// Paragraph boundaries (blank lines) are respected where possible;
/// paragraphs that alone exceed the budget are split on word windows.
/// Indices start at 0 and are contiguous in document order. An empty
/// document yields an empty vec — the caller decides what that means.
pub fn chunk_document(doc: &Document, config: &ChunkerConfig) -> Vec<Chunk> {
    let doc_meta = doc.metadata();
    let mut chunks = Vec::new();

    let mut current = String::new();
    let mut current_tokens = 0usize;

    let flush = |buf: &mut String, tokens: &mut usize, chunks: &mut Vec<Chunk>| {
        if buf.trim().is_empty() {
            buf.clear();
            *tokens = 0;
            return;
        }
        let mut metadata = doc_meta.clone();
        metadata.insert("chunk_index".to_string(), Value::from(chunks.len()));
        chunks.push(Chunk {
            text: std::mem::take(buf).trim().to_string(),
            chunk_index: chunks.len(),
            source: doc.source.clone(),
            metadata,
            embedding: None,
        });
        *tokens = 0;
    };

    for paragraph in doc.text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        let para_tokens = estimate_tokens(paragraph);

        if para_tokens > config.max_tokens {
            // Oversized paragraph: emit what we have, then window it.
            flush(&mut current, &mut current_tokens, &mut chunks);
            for window in split_by_words(paragraph, config.max_tokens) {
                let mut buf = window;
                let mut t = 0;
                flush(&mut buf, &mut t, &mut chunks);
            }
            continue;
        }

        if current_tokens + para_tokens > config.max_tokens {
            flush(&mut current, &mut current_tokens, &mut chunks);
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
        current_tokens += para_tokens;
    }
    flush(&mut current, &mut current_tokens, &mut chunks);

    chunks
}

/// Split a single long paragraph into word windows under the budget.
fn split_by_words(text: &str, max_tokens: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    // 1 token ≈ 0.75 words (WordPiece averages ~1.3 tokens/word).
    let words_per_chunk = ((max_tokens as f32) * 0.75).max(1.0) as usize;

    words
        .chunks(words_per_chunk)
        .map(|w| w.join(" "))
        .collect()
}

/// Rough token estimation: words / 0.75.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    ((words as f32) / 0.75).ceil() as usize
}
