//! Overlapping text chunker.
//!
//! Splits extracted document text into windows of at most
//! `chunking.chunk_size` characters, with consecutive windows sharing
//! `chunking.overlap` characters so a fact severed at a window boundary is
//! still retrievable from at least one chunk. Window ends snap back to the
//! last whitespace in the window when that keeps at least half the span,
//! so words are cut only when a run of text has no break points.
//!
//! Splitting is deterministic: identical input text and configuration
//! always yield an identical chunk sequence, which re-index idempotence
//! relies on.

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Split `text` into ordered, overlapping chunks attributed to `source`.
///
/// Whitespace-only input yields no chunks. Chunk indices are contiguous
/// from 0. All boundaries respect UTF-8 character boundaries.
pub fn split_text(source: &str, text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let n = chars.len();
    let size = config.chunk_size.max(1);
    let overlap = config.overlap.min(size.saturating_sub(1));
    let byte_at = |pos: usize| if pos == n { text.len() } else { chars[pos].0 };

    let mut chunks = Vec::new();
    let mut index = 0u32;
    let mut start = 0usize;

    loop {
        let hard_end = (start + size).min(n);
        let mut end = hard_end;
        if hard_end < n {
            if let Some(ws) = (start..hard_end).rev().find(|&p| chars[p].1.is_whitespace()) {
                if ws + 1 > start + size / 2 {
                    end = ws + 1;
                }
            }
        }

        let piece = text[byte_at(start)..byte_at(end)].trim();
        if !piece.is_empty() {
            chunks.push(Chunk {
                source: source.to_string(),
                index,
                text: piece.to_string(),
            });
            index += 1;
        }

        if end >= n {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            overlap,
        }
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = split_text("doc.txt", "Hello, world!", &config(800, 100));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].source, "doc.txt");
    }

    #[test]
    fn whitespace_only_yields_no_chunks() {
        assert!(split_text("doc.txt", "", &config(800, 100)).is_empty());
        assert!(split_text("doc.txt", "   \n\t  ", &config(800, 100)).is_empty());
    }

    #[test]
    fn indices_are_contiguous_from_zero() {
        let text = (0..200)
            .map(|i| format!("word{:04}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = split_text("doc.txt", &text, &config(64, 16));
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i as u32);
        }
    }

    #[test]
    fn chunks_never_exceed_the_configured_span() {
        let text = (0..200)
            .map(|i| format!("word{:04}", i))
            .collect::<Vec<_>>()
            .join(" ");
        for chunk in split_text("doc.txt", &text, &config(64, 16)) {
            assert!(chunk.text.chars().count() <= 64);
        }
    }

    #[test]
    fn consecutive_chunks_share_overlap_context() {
        let text = (0..100)
            .map(|i| format!("w{:03}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = split_text("doc.txt", &text, &config(80, 20));
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let last_word = pair[0].text.split_whitespace().last().unwrap();
            assert!(
                pair[1].text.contains(last_word),
                "chunk {} does not carry '{}' over the boundary",
                pair[1].index,
                last_word
            );
        }
    }

    #[test]
    fn deterministic_for_identical_input_and_config() {
        let text = "Alpha bravo charlie delta echo foxtrot golf hotel india juliett kilo \
                    lima mike november oscar papa quebec romeo sierra tango uniform victor."
            .repeat(8);
        let a = split_text("doc.txt", &text, &config(120, 30));
        let b = split_text("doc.txt", &text, &config(120, 30));
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.index, y.index);
            assert_eq!(x.text, y.text);
        }
    }

    #[test]
    fn handles_text_without_break_points() {
        let text = "こんにちは世界".repeat(50);
        let chunks = split_text("doc.txt", &text, &config(50, 10));
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 50);
        }
        let again = split_text("doc.txt", &text, &config(50, 10));
        assert_eq!(chunks.len(), again.len());
    }
}
