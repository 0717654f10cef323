//! Splits document text into bounded, overlapping windows for embedding and search.
//!
//! Windows are measured in characters. The stepping rule lives in [window_spans] and does not
//! care about the unit, so a token-based splitter can reuse it over token offsets.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::documents::Document;

/// Default window size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1500;
/// Default number of characters shared by consecutive windows.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// A chunk of a document, as written to the chunk log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub doc_id: String,
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub validity: String,
    /// Ordinal of this chunk within its document (0, 1, 2, …).
    pub chunk_id: usize,
    pub text: String,
}

/// One window cut from a piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextWindow {
    /// Ordinal among the windows emitted for the same input.
    pub chunk_id: usize,
    /// Character span in the input.
    pub span: Range<usize>,
    /// Window text, trimmed and never empty.
    pub text: String,
}

/// Fixed-size overlapping window splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl Chunker {
    /// Requires `0 <= overlap < size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self, ChunkError> {
        if size == 0 {
            return Err(ChunkError::ZeroSize);
        }
        if overlap >= size {
            return Err(ChunkError::OverlapTooLarge { size, overlap });
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Cuts `text` into windows. Windows that are only whitespace are skipped, so the
    /// emitted `chunk_id`s stay dense.
    pub fn chunk(&self, text: &str) -> Vec<TextWindow> {
        // Byte offset of every char boundary, plus the end of the string.
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let len = offsets.len() - 1;

        let mut windows = Vec::new();
        for span in window_spans(len, self.size, self.overlap) {
            let slice = text[offsets[span.start]..offsets[span.end]].trim();
            if slice.is_empty() {
                continue;
            }
            windows.push(TextWindow {
                chunk_id: windows.len(),
                span,
                text: slice.to_string(),
            });
        }
        windows
    }
}

/// Window spans over a sequence of `len` units.
///
/// `end_i = min(start_i + size, len)` and `start_{i+1} = end_i - overlap`, stopping once a
/// window reaches `len`. Callers must uphold `overlap < size`; [Chunker::new] checks it.
pub fn window_spans(len: usize, size: usize, overlap: usize) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    if len == 0 || size == 0 || overlap >= size {
        return spans;
    }
    let mut start = 0;
    loop {
        let end = (start + size).min(len);
        spans.push(start..end);
        if end == len {
            break;
        }
        start = end - overlap;
    }
    spans
}

/// Chunk a single document. Each text block is windowed on its own; chunk ids run across
/// blocks so they stay unique within the document.
pub fn chunk_document(doc: &Document, chunker: &Chunker) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for block in doc.blocks() {
        for window in chunker.chunk(&block) {
            chunks.push(Chunk {
                doc_id: doc.id.clone(),
                title: doc.title.clone(),
                url: doc.url.clone(),
                validity: doc.validity.clone(),
                chunk_id: chunks.len(),
                text: window.text,
            });
        }
    }
    chunks
}

/// Chunk all documents. Returns chunks from all documents in order.
pub fn chunk_documents(docs: &[Document], chunker: &Chunker) -> Vec<Chunk> {
    docs.iter().flat_map(|d| chunk_document(d, chunker)).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk size must be greater than zero")]
    ZeroSize,
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn doc(text: &str) -> Document {
        Document {
            id: "reglamento".to_string(),
            path: PathBuf::from("reglamento.txt"),
            title: "Reglamento".to_string(),
            url: String::new(),
            validity: "2025".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn short_text_is_one_chunk() {
        let c = Chunker::new(100, 10).unwrap().chunk("Plazo de matrícula.");
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].span, 0..19);
        assert_eq!(c[0].text, "Plazo de matrícula.");
    }

    #[test]
    fn consecutive_windows_share_exactly_the_overlap() {
        let spans = window_spans(25, 10, 3);
        assert_eq!(spans, vec![0..10, 7..17, 14..24, 21..25]);
        for pair in spans.windows(2) {
            assert_eq!(pair[1].start, pair[0].end - 3);
        }
    }

    #[test]
    fn spans_cover_the_whole_input() {
        for len in 0..40 {
            for size in 1..12 {
                for overlap in 0..size {
                    let spans = window_spans(len, size, overlap);
                    let mut covered = vec![false; len];
                    for s in &spans {
                        assert!(s.end - s.start <= size);
                        covered[s.clone()].iter_mut().for_each(|c| *c = true);
                    }
                    assert!(covered.iter().all(|&c| c), "len={len} size={size} overlap={overlap}");
                    if len > 0 {
                        assert_eq!(spans.last().unwrap().end, len);
                    }
                }
            }
        }
    }

    #[test]
    fn empty_and_blank_text_yield_nothing() {
        let chunker = Chunker::new(4, 1).unwrap();
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("   \n\t  ").is_empty());
    }

    #[test]
    fn blank_windows_are_skipped_and_ids_stay_dense() {
        let chunker = Chunker::new(4, 0).unwrap();
        let c = chunker.chunk("abcd        efgh");
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].chunk_id, 0);
        assert_eq!(c[1].chunk_id, 1);
        assert_eq!(c[1].text, "efgh");
        assert!(c.iter().all(|w| !w.text.trim().is_empty()));
    }

    #[test]
    fn windows_count_characters_not_bytes() {
        let c = Chunker::new(3, 1).unwrap().chunk("ñáéíó");
        let texts: Vec<&str> = c.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["ñáé", "éíó"]);
    }

    #[test]
    fn rejects_invalid_settings() {
        assert!(matches!(Chunker::new(0, 0), Err(ChunkError::ZeroSize)));
        assert!(matches!(
            Chunker::new(10, 10),
            Err(ChunkError::OverlapTooLarge { .. })
        ));
        assert!(Chunker::new(10, 9).is_ok());
    }

    #[test]
    fn chunk_ids_run_across_blocks() {
        let d = doc("primera página\u{c}segunda página");
        let chunks = chunk_document(&d, &Chunker::new(100, 10).unwrap());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_id, 0);
        assert_eq!(chunks[1].chunk_id, 1);
        assert_eq!(chunks[1].text, "segunda página");
        assert_eq!(chunks[1].doc_id, "reglamento");
        assert_eq!(chunks[1].validity, "2025");
    }
}
