//! Boundary-aware overlapping text chunker.
//!
//! Splits document content into windows of at most `max_chunk_size`
//! characters. A window's end is snapped to a nearby sentence terminator
//! (`". "`) or paragraph break (`"\n\n"`) when one lies between
//! `end - overlap` and `end + snap_window`; the next window starts `overlap`
//! characters before the previous end, so consecutive chunks share context.
//!
//! The chunker is pure and deterministic: identical text and parameters
//! always yield an identical sequence, which keeps re-syncs idempotent.

use crate::config::ChunkingConfig;

const BREAKS: [&str; 2] = [". ", "\n\n"];

/// A chunk of text plus the byte span of the window it was cut from.
///
/// `text` is the window trimmed of surrounding whitespace; `start..end`
/// is the untrimmed window inside the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Split `text` into overlapping chunks with contiguous indices from 0.
///
/// Empty text yields no chunks. Windows that trim to nothing are dropped.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<TextChunk> {
    if text.is_empty() {
        return Vec::new();
    }

    // Byte offset of every char boundary, so sizes are counted in characters.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let len = bounds.len() - 1;

    let max = config.max_chunk_size.max(1);
    let overlap = config.overlap.min(max - 1);

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < len {
        let mut end = (start + max).min(len);

        if end < len {
            let from = end - overlap;
            let limit = (end + config.snap_window + 2).min(len);
            if let Some(brk) = find_break(text, &bounds, from, limit) {
                if brk <= end + config.snap_window {
                    end = brk + 2;
                }
            }
        }

        let window = &text[bounds[start]..bounds[end]];
        let trimmed = window.trim();
        if !trimmed.is_empty() {
            chunks.push(TextChunk {
                index: chunks.len(),
                start: bounds[start],
                end: bounds[end],
                text: trimmed.to_string(),
            });
        }

        if end >= len {
            break;
        }

        let next = end - overlap;
        start = if next > start { next } else { end };
    }

    chunks
}

/// Char index of the first break at or after char `from`, searching up to char `limit`.
fn find_break(text: &str, bounds: &[usize], from: usize, limit: usize) -> Option<usize> {
    let haystack = &text[bounds[from]..bounds[limit]];
    let byte_pos = BREAKS.iter().filter_map(|b| haystack.find(b)).min()?;
    // Breaks are ASCII, so the match always sits on a char boundary.
    bounds.binary_search(&(bounds[from] + byte_pos)).ok()
}
