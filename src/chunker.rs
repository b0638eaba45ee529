//! Deterministic content chunking with overlap and boundary snapping

use crate::config::{ChunkMethod, ChunkingConfig};
use crate::types::DocumentChunk;
use regex::Regex;
use std::sync::OnceLock;

/// Content chunker for splitting text into storable pieces
pub struct ContentChunker {
    config: ChunkingConfig,
}

fn sentence_split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]+\s+").unwrap())
}

fn paragraph_split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").unwrap())
}

impl ContentChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Split text into an ordered chunk list covering the full input
    ///
    /// Chunk indexes are contiguous from 0 and `chunk_offset` is the byte
    /// offset of each chunk start in the source text. Embeddings are left
    /// empty for the embedding stage.
    pub fn chunk(&self, text: &str, file_path: &str) -> Vec<DocumentChunk> {
        if text.is_empty() {
            return Vec::new();
        }
        match self.config.method {
            ChunkMethod::Fixed => self.chunk_fixed(text, file_path),
            ChunkMethod::Sentence => self.chunk_by_separator(text, file_path, sentence_split_re()),
            ChunkMethod::Paragraph => {
                self.chunk_by_separator(text, file_path, paragraph_split_re())
            }
        }
    }

    /// Sliding window with leftward boundary snapping
    fn chunk_fixed(&self, text: &str, file_path: &str) -> Vec<DocumentChunk> {
        let size = self.config.chunk_size.max(1);
        let overlap = self.config.overlap.min(size.saturating_sub(1));

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut index = 0usize;

        while start < text.len() {
            let window_end = floor_char_boundary(text, (start + size).min(text.len()));
            let end = if window_end < text.len() {
                snap_boundary(text, start, window_end, size)
            } else {
                window_end
            };

            let content = &text[start..end];
            chunks.push(DocumentChunk::new(
                file_path,
                index,
                content.to_string(),
                start,
                estimate_tokens(content),
            ));
            index += 1;

            if end >= text.len() {
                break;
            }

            // The window start must strictly advance even for degenerate
            // inputs where snapping collapses the chunk
            let mut next = end.saturating_sub(overlap);
            if next <= start {
                next = start + 1;
            }
            start = ceil_char_boundary(text, next);
        }

        chunks
    }

    /// Greedy grouping of separator-delimited spans up to the chunk size
    fn chunk_by_separator(&self, text: &str, file_path: &str, re: &Regex) -> Vec<DocumentChunk> {
        let size = self.config.chunk_size.max(1);

        // Spans end after the separator for sentences so terminators stay
        // attached to their sentence
        let mut spans: Vec<(usize, usize)> = Vec::new();
        let mut cursor = 0usize;
        for m in re.find_iter(text) {
            if m.end() > cursor {
                spans.push((cursor, m.end()));
            }
            cursor = m.end();
        }
        if cursor < text.len() {
            spans.push((cursor, text.len()));
        }

        let mut chunks = Vec::new();
        let mut index = 0usize;
        let mut group_start: Option<usize> = None;
        let mut group_end = 0usize;

        for (span_start, span_end) in spans {
            match group_start {
                None => {
                    group_start = Some(span_start);
                    group_end = span_end;
                }
                Some(gs) if span_end - gs <= size => {
                    group_end = span_end;
                }
                Some(gs) => {
                    let content = &text[gs..group_end];
                    if !content.trim().is_empty() {
                        chunks.push(DocumentChunk::new(
                            file_path,
                            index,
                            content.to_string(),
                            gs,
                            estimate_tokens(content),
                        ));
                        index += 1;
                    }
                    group_start = Some(span_start);
                    group_end = span_end;
                }
            }
        }

        if let Some(gs) = group_start {
            let content = &text[gs..group_end];
            if !content.trim().is_empty() {
                chunks.push(DocumentChunk::new(
                    file_path,
                    index,
                    content.to_string(),
                    gs,
                    estimate_tokens(content),
                ));
            }
        }

        chunks
    }
}

impl Default for ContentChunker {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

/// Snap a window end leftward to the best breakpoint
///
/// Prefers the last sentence terminator past half the window, then the last
/// whitespace past 30% of the window, else the raw window end.
fn snap_boundary(text: &str, start: usize, window_end: usize, size: usize) -> usize {
    let window = &text[start..window_end];

    if let Some(pos) = window.rfind(['.', '!', '?']) {
        if pos > size / 2 {
            return start + pos + 1;
        }
    }

    if let Some(pos) = window.rfind(char::is_whitespace) {
        if pos > (size * 3) / 10 {
            return start + pos;
        }
    }

    window_end
}

/// Rough token estimate: one token per four characters, rounded up
fn estimate_tokens(content: &str) -> usize {
    content.len().div_ceil(4).max(1)
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize, method: ChunkMethod) -> ContentChunker {
        ContentChunker::new(ChunkingConfig {
            chunk_size: size,
            overlap,
            method,
        })
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = ContentChunker::default().chunk("This is a short text.", "a.txt");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "This is a short text.");
        assert_eq!(chunks[0].chunk_offset, 0);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(ContentChunker::default().chunk("", "a.txt").is_empty());
    }

    #[test]
    fn test_repeated_text_chunk_count() {
        let text = "alpha bravo charlie ".repeat(500);
        let chunks = chunker(100, 20, ChunkMethod::Fixed).chunk(&text, "a.txt");
        assert!(chunks.len() >= 100, "got {} chunks", chunks.len());

        // Contiguous indexes from zero
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            assert!(chunk.token_count > 0);
        }
    }

    #[test]
    fn test_offsets_strictly_increase() {
        let text = "word ".repeat(400);
        let chunks = chunker(64, 16, ChunkMethod::Fixed).chunk(&text, "a.txt");
        for pair in chunks.windows(2) {
            assert!(pair[1].chunk_offset > pair[0].chunk_offset);
        }
    }

    #[test]
    fn test_sentence_boundary_preferred() {
        let text = format!("{}. {}", "a".repeat(70), "b".repeat(60));
        let chunks = chunker(100, 10, ChunkMethod::Fixed).chunk(&text, "a.txt");
        assert!(chunks[0].content.ends_with('.'));
    }

    #[test]
    fn test_degenerate_input_terminates() {
        // No whitespace, no terminators: must advance every round
        let text = "x".repeat(5000);
        let chunks = chunker(100, 99, ChunkMethod::Fixed).chunk(&text, "a.txt");
        assert!(!chunks.is_empty());
        for pair in chunks.windows(2) {
            assert!(pair[1].chunk_offset > pair[0].chunk_offset);
        }
        let last = chunks.last().unwrap();
        assert_eq!(last.chunk_offset + last.content.len(), text.len());
    }

    #[test]
    fn test_multibyte_input_respects_boundaries() {
        let text = "héllo wörld ü ".repeat(200);
        let chunks = chunker(50, 10, ChunkMethod::Fixed).chunk(&text, "a.txt");
        // Slicing panics on bad boundaries, so reaching here with coverage
        // from offsets is the assertion
        for chunk in &chunks {
            assert_eq!(
                &text[chunk.chunk_offset..chunk.chunk_offset + chunk.content.len()],
                chunk.content
            );
        }
    }

    #[test]
    fn test_sentence_method_groups_sentences() {
        let text = "One sentence here. Another one there! A third? Plus a tail";
        let chunks = chunker(40, 0, ChunkMethod::Sentence).chunk(text, "a.txt");
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].chunk_offset, 0);
    }

    #[test]
    fn test_paragraph_method_splits_on_blank_lines() {
        let text = "para one line\n\npara two line\n\n\npara three";
        let chunks = chunker(20, 0, ChunkMethod::Paragraph).chunk(text, "a.txt");
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].content.contains("para one"));
        assert!(chunks[2].content.contains("para three"));
    }

    #[test]
    fn test_token_estimate() {
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("x"), 1);
    }
}
