//! Overlapping, boundary-aware text chunker.
//!
//! Splits a document's summary text into windows of roughly `chunk_size`
//! characters. When a window would end inside the text, the cut is moved back
//! to the nearest natural boundary (paragraph, line, sentence, word) found
//! between the middle of the window and `boundary_slack` characters past its
//! end. Consecutive windows overlap by `chunk_overlap` characters.
//!
//! All offsets are measured in `char`s, so multi-byte text is never split
//! inside a code point.

use crate::config::IndexConfig;
use crate::models::{DocumentInfo, IndexChunk};

/// Boundaries in preference order.
const BOUNDARIES: [&str; 5] = ["\n\n", "\n", ". ", "。", " "];

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    pub size: usize,
    pub overlap: usize,
    pub slack: usize,
}

impl Chunker {
    pub fn new(size: usize, overlap: usize, slack: usize) -> Self {
        Self {
            size: size.max(1),
            overlap: overlap.min(size.saturating_sub(1)),
            slack,
        }
    }

    pub fn from_config(config: &IndexConfig) -> Self {
        Self::new(
            config.chunk_size,
            config.chunk_overlap,
            config.boundary_slack,
        )
    }

    /// Char ranges `[start, end)` of each window, before trimming.
    pub fn spans(&self, text: &str) -> Vec<(usize, usize)> {
        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();
        let mut spans = Vec::new();
        if n == 0 {
            return spans;
        }

        let mut start = 0;
        while start < n {
            let mut end = (start + self.size).min(n);
            if end < n {
                let lo = start + self.size / 2;
                let hi = (end + self.slack).min(n);
                if let Some(cut) = find_boundary(&chars, lo, hi) {
                    end = cut;
                }
            }
            spans.push((start, end));
            if end >= n {
                break;
            }
            let next = end.saturating_sub(self.overlap);
            start = if next > start { next } else { end };
        }
        spans
    }

    /// Trimmed, non-empty chunk texts.
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        self.spans(text)
            .into_iter()
            .map(|(s, e)| chars[s..e].iter().collect::<String>())
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    }
}

/// Position just after the last occurrence of the most preferred boundary
/// lying entirely within `chars[lo..hi]`.
fn find_boundary(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
    if lo >= hi {
        return None;
    }
    let window = &chars[lo..hi];
    for sep in BOUNDARIES {
        let sep: Vec<char> = sep.chars().collect();
        if sep.len() > window.len() {
            continue;
        }
        let found = (0..=window.len() - sep.len())
            .rev()
            .find(|&i| window[i..i + sep.len()] == sep[..]);
        if let Some(i) = found {
            return Some(lo + i + sep.len());
        }
    }
    None
}

/// Chunk a document's summary text into index records.
pub fn chunk_document(doc: &DocumentInfo, chunker: &Chunker, prefix_chars: usize) -> Vec<IndexChunk> {
    let texts = chunker.split(&doc.summary_text(prefix_chars));
    let total = texts.len() as u32;
    texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| IndexChunk {
            id: IndexChunk::chunk_id(&doc.id, i as u32),
            doc_id: doc.id.clone(),
            ordinal: i as u32,
            total_chunks: total,
            text,
            title: doc.title.clone(),
            authors: doc.authors.clone(),
        })
        .collect()
}
