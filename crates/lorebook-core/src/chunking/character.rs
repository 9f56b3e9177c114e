//! Character-budget splitter built on the `text-splitter` crate.
//!
//! `text-splitter` performs recursive splitting over descending semantic
//! levels (paragraph break, line break, sentence boundary, word boundary,
//! hard cut), which matches the split priority this engine requires.

use super::{Splitter, TextChunk};
use crate::error::ChunkingError;
use text_splitter::{ChunkConfig, TextSplitter};

/// Recursive character-based splitter.
///
/// Chunk size and overlap are passed per call so one splitter instance can
/// serve every ingestion with the engine's configured budget.
#[derive(Debug, Default)]
pub struct CharacterSplitter;

impl CharacterSplitter {
    /// Creates a new character splitter.
    pub fn new() -> Self {
        Self
    }
}

impl Splitter for CharacterSplitter {
    fn split(&self, text: &str, size: usize, overlap: usize) -> Result<Vec<TextChunk>, ChunkingError> {
        if overlap >= size {
            return Err(ChunkingError::InvalidConfig(format!(
                "overlap ({overlap}) must be smaller than chunk size ({size})"
            )));
        }
        if text.trim().is_empty() {
            return Ok(vec![]);
        }

        let chunk_config = ChunkConfig::new(size)
            .with_overlap(overlap)
            .map_err(|e| ChunkingError::InvalidConfig(e.to_string()))?
            .with_trim(true);

        let splitter = TextSplitter::new(chunk_config);

        let chunks = splitter
            .chunk_indices(text)
            .enumerate()
            .map(|(index, (start, chunk))| TextChunk {
                index,
                text: chunk.to_string(),
                start,
                end: start + chunk.len(),
            })
            .collect();

        Ok(chunks)
    }

    fn name(&self) -> &'static str {
        "character"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_chunk() {
        let splitter = CharacterSplitter::new();
        let chunks = splitter.split("First sentence. Second sentence.", 1000, 200).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].start, 0);
    }

    #[test]
    fn test_empty_text() {
        let splitter = CharacterSplitter::new();
        let chunks = splitter.split("", 1000, 200).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_whitespace_only() {
        let splitter = CharacterSplitter::new();
        let chunks = splitter.split("   \n\t  ", 1000, 200).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_long_text_produces_multiple_chunks() {
        let splitter = CharacterSplitter::new();
        let text = "This is a sentence about something. ".repeat(50);
        let chunks = splitter.split(&text, 100, 20).unwrap();

        assert!(chunks.len() > 1, "expected multiple chunks, got {}", chunks.len());
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 100);
        }
    }

    #[test]
    fn test_offsets_point_into_source() {
        let splitter = CharacterSplitter::new();
        let text = "Paragraph one about retrieval.\n\nParagraph two about ranking.\n\nParagraph three about grounding.";
        let chunks = splitter.split(text, 40, 10).unwrap();

        for chunk in &chunks {
            assert_eq!(&text[chunk.start..chunk.end], chunk.text);
        }
    }

    #[test]
    fn test_chunks_ordered_by_position() {
        let splitter = CharacterSplitter::new();
        let text = "one two three four five six seven eight nine ten ".repeat(20);
        let chunks = splitter.split(&text, 80, 0).unwrap();

        for pair in chunks.windows(2) {
            assert!(pair[0].start < pair[1].start);
        }
    }

    #[test]
    fn test_overlap_must_stay_below_size() {
        let splitter = CharacterSplitter::new();
        let result = splitter.split("some text to split", 10, 10);
        assert!(matches!(result, Err(ChunkingError::InvalidConfig(_))));
    }

    #[test]
    fn test_deterministic() {
        let splitter = CharacterSplitter::new();
        let text = "Deterministic splitting. Same input, same output. ".repeat(30);
        let first = splitter.split(&text, 120, 30).unwrap();
        let second = splitter.split(&text, 120, 30).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unicode_handling() {
        let splitter = CharacterSplitter::new();
        let text = "Hello 世界. This is a test. Здравствуй мир!";
        let chunks = splitter.split(text, 1000, 0).unwrap();

        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert_eq!(&text[chunk.start..chunk.end], chunk.text);
        }
    }
}
