//! Sentence-aware overlapping chunker.
//!
//! Chunks are exact byte ranges of the input. A chunk ends at the last
//! sentence boundary that keeps it at least half the target size; failing
//! that, at the last word boundary; failing that, at the size limit. The
//! next chunk starts `overlap` bytes back, moved forward to the nearest
//! sentence or word start. Because chunks are contiguous ranges that
//! overlap, [`reconstruct`] recovers the input exactly.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    /// Target chunk length in bytes.
    pub target_size: usize,
    /// Bytes shared between consecutive chunks.
    pub overlap: usize,
}

impl ChunkPolicy {
    pub fn new(target_size: usize, overlap: usize) -> Self {
        let target_size = target_size.max(1);
        Self {
            target_size,
            overlap: overlap.min(target_size - 1),
        }
    }
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self::new(1000, 200)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    /// Byte offset of the first character in the source text.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
    pub text: String,
}

fn floor_boundary(text: &str, mut i: usize) -> usize {
    i = i.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn next_boundary(text: &str, i: usize) -> usize {
    text[i..].chars().next().map_or(text.len(), |c| i + c.len_utf8())
}

/// Offsets where a new sentence starts (after terminal punctuation or a
/// line break, past the following whitespace).
fn sentence_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        let terminal = matches!(c, '.' | '!' | '?');
        let breaks = c == '\n' || (terminal && chars.peek().is_some_and(|(_, n)| n.is_whitespace()));
        if !breaks {
            continue;
        }
        while chars.peek().is_some_and(|(_, n)| n.is_whitespace()) {
            chars.next();
        }
        if let Some(&(i, _)) = chars.peek() {
            starts.push(i);
        }
    }
    starts
}

/// Offsets where a new word starts.
fn word_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut prev_space = false;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            prev_space = true;
        } else if prev_space {
            starts.push(i);
            prev_space = false;
        }
    }
    starts
}

/// Split `text` into overlapping chunks.
pub fn chunk(text: &str, policy: &ChunkPolicy) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }
    let size = policy.target_size.max(1);
    let overlap = policy.overlap.min(size - 1);
    let sentences = sentence_starts(text);
    let words = word_starts(text);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let limit = floor_boundary(text, start + size);
        if limit >= text.len() {
            chunks.push(make_chunk(text, chunks.len(), start, text.len()));
            break;
        }

        let min_end = start + size / 2;
        let mut end = sentences
            .iter()
            .rev()
            .find(|&&b| b > start && b >= min_end && b <= limit)
            .or_else(|| words.iter().rev().find(|&&b| b > start && b <= limit))
            .copied()
            .unwrap_or(limit);
        if end <= start {
            end = next_boundary(text, start);
        }
        chunks.push(make_chunk(text, chunks.len(), start, end));

        let back = floor_boundary(text, end.saturating_sub(overlap));
        let mut next = sentences
            .iter()
            .find(|&&b| b >= back && b < end)
            .or_else(|| words.iter().find(|&&b| b >= back && b < end))
            .copied()
            .unwrap_or(back);
        if overlap == 0 || next <= start {
            next = end;
        }
        start = next;
    }
    chunks
}

fn make_chunk(text: &str, index: usize, start: usize, end: usize) -> Chunk {
    Chunk {
        index,
        start,
        end,
        text: text[start..end].to_string(),
    }
}

/// Concatenate chunks with their overlaps removed.
pub fn reconstruct(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut covered = 0usize;
    for c in chunks {
        if c.end <= covered {
            continue;
        }
        let skip = covered.saturating_sub(c.start);
        out.push_str(&c.text[skip..]);
        covered = c.end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> String {
        let mut doc = String::new();
        for i in 0..40 {
            doc.push_str(&format!(
                "Sentence number {i} talks about assay {i} and the protein yield observed. "
            ));
            if i % 7 == 6 {
                doc.push_str("\n\n");
            }
        }
        doc.trim().to_string()
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk("One sentence.", &ChunkPolicy::new(100, 20));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "One sentence.");
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk("", &ChunkPolicy::default()).is_empty());
    }

    #[test]
    fn reconstructs_original() {
        let doc = document();
        for (size, overlap) in [(120, 30), (200, 0), (64, 60), (500, 100)] {
            let chunks = chunk(&doc, &ChunkPolicy::new(size, overlap));
            assert!(chunks.len() > 1);
            assert_eq!(reconstruct(&chunks), doc, "size={size} overlap={overlap}");
        }
    }

    #[test]
    fn chunks_respect_size_and_overlap() {
        let doc = document();
        let chunks = chunk(&doc, &ChunkPolicy::new(200, 50));
        for pair in chunks.windows(2) {
            assert!(pair[1].start < pair[0].end, "consecutive chunks overlap");
            assert!(pair[1].start > pair[0].start);
        }
        assert!(chunks.iter().all(|c| c.text.len() <= 200));
        assert_eq!(chunks.first().map(|c| c.start), Some(0));
        assert_eq!(chunks.last().map(|c| c.end), Some(doc.len()));
    }

    #[test]
    fn prefers_sentence_boundaries() {
        let doc = document();
        let chunks = chunk(&doc, &ChunkPolicy::new(200, 50));
        for c in &chunks[..chunks.len() - 1] {
            let trimmed = c.text.trim_end();
            assert!(trimmed.ends_with('.'), "chunk should end a sentence: {trimmed:?}");
        }
    }

    #[test]
    fn long_word_without_boundaries_is_hard_split() {
        let doc = "x".repeat(250);
        let chunks = chunk(&doc, &ChunkPolicy::new(100, 10));
        assert!(chunks.len() >= 3);
        assert_eq!(reconstruct(&chunks), doc);
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let doc = "Größe über Maß. ".repeat(30);
        let doc = doc.trim();
        let chunks = chunk(doc, &ChunkPolicy::new(50, 10));
        assert_eq!(reconstruct(&chunks), doc);
    }

    #[test]
    fn policy_clamps_overlap() {
        let p = ChunkPolicy::new(10, 50);
        assert_eq!(p.overlap, 9);
    }
}
