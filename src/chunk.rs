//! Overlapping-window text chunker.
//!
//! Splits captured text into [`ContentChunk`]s bounded by a configurable
//! window size, with a configurable overlap carried between consecutive
//! windows. Splitting prefers paragraph boundaries (`\n\n`), then line
//! breaks, then sentence punctuation, then spaces, before falling back to a
//! hard split at the size bound.
//!
//! The overlap exists solely to preserve entity context that spans a window
//! boundary. The union of `[start, end)` ranges always covers the source
//! text with no gaps and no omitted tail.

use serde::Serialize;

/// One window of the source text, with byte offsets into the original.
#[derive(Debug, Clone, Serialize)]
pub struct ContentChunk {
    pub index: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Break characters tried in preference order when a window must end
/// mid-text.
const SENTENCE_BREAKS: &[char] = &['.', '!', '?', ';', ':'];

/// Split text into overlapping windows of at most `chunk_size` bytes.
///
/// `overlap` is clamped below `chunk_size` so every window makes forward
/// progress. Returns at least one chunk, even for empty input.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<ContentChunk> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);

    if text.len() <= chunk_size {
        return vec![ContentChunk {
            index: 0,
            text: text.to_string(),
            start: 0,
            end: text.len(),
        }];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0usize;

    while start < text.len() {
        let hard_end = floor_char_boundary(text, (start + chunk_size).min(text.len()));
        let end = if hard_end < text.len() {
            find_break(text, start, hard_end)
        } else {
            hard_end
        };

        chunks.push(ContentChunk {
            index,
            text: text[start..end].to_string(),
            start,
            end,
        });
        index += 1;

        if end >= text.len() {
            break;
        }

        // Step back by the overlap so boundary-spanning context is carried
        // into the next window, but never so far that we stop advancing.
        let mut next = floor_char_boundary(text, end.saturating_sub(overlap));
        if next <= start {
            next = end;
        }
        start = next;
    }

    chunks
}

/// Pick the best break position inside `(start, hard_end]`, preferring
/// paragraph > newline > sentence punctuation > space. Breaks in the first
/// half of the window are rejected to avoid degenerate slivers.
fn find_break(text: &str, start: usize, hard_end: usize) -> usize {
    let window = &text[start..hard_end];
    let min_len = window.len() / 2;

    if let Some(pos) = window.rfind("\n\n") {
        let cut = pos + 2;
        if cut > min_len {
            return start + cut;
        }
    }
    if let Some(pos) = window.rfind('\n') {
        let cut = pos + 1;
        if cut > min_len {
            return start + cut;
        }
    }
    if let Some(pos) = window.rfind(SENTENCE_BREAKS) {
        let cut = pos + 1;
        if cut > min_len {
            return start + cut;
        }
    }
    if let Some(pos) = window.rfind(' ') {
        let cut = pos + 1;
        if cut > min_len {
            return start + cut;
        }
    }

    hard_end
}

/// Largest char boundary at or below `index`.
fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers(text: &str, chunks: &[ContentChunk]) {
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks.last().unwrap().end, text.len());
        for pair in chunks.windows(2) {
            // No gap: each window starts at or before its predecessor ends.
            assert!(pair[1].start <= pair[0].end);
            assert!(pair[1].start > pair[0].start, "windows must advance");
        }
        for c in chunks {
            assert_eq!(&text[c.start..c.end], c.text);
        }
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = split_text("Hello, world!", 500, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn empty_text_single_chunk() {
        let chunks = split_text("", 500, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].end, 0);
    }

    #[test]
    fn long_text_covers_source() {
        let text = (0..40)
            .map(|i| format!("Paragraph number {} with some detail text.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = split_text(&text, 200, 40);
        assert!(chunks.len() > 1);
        assert_covers(&text, &chunks);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let text = "word ".repeat(200);
        let chunks = split_text(&text, 100, 30);
        assert!(chunks.len() > 1);
        assert_covers(&text, &chunks);
        // At least one pair actually shares an overlap region.
        assert!(chunks.windows(2).any(|p| p[1].start < p[0].end));
    }

    #[test]
    fn prefers_paragraph_boundary() {
        let text = format!("{}\n\n{}", "a".repeat(80), "b".repeat(80));
        let chunks = split_text(&text, 100, 10);
        // First window should end right after the paragraph break.
        assert!(chunks[0].text.ends_with("\n\n"));
    }

    #[test]
    fn hard_split_without_separators() {
        let text = "x".repeat(1000);
        let chunks = split_text(&text, 300, 50);
        assert_covers(&text, &chunks);
        assert!(chunks.iter().all(|c| c.text.len() <= 300));
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "héllo wörld ".repeat(100);
        let chunks = split_text(&text, 97, 13);
        assert_covers(&text, &chunks);
    }

    #[test]
    fn overlap_never_stalls_progress() {
        // overlap >= chunk_size would otherwise loop forever
        let text = "abc def ghi jkl".repeat(20);
        let chunks = split_text(&text, 10, 50);
        assert_covers(&text, &chunks);
    }
}
