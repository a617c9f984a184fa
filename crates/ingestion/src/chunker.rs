//! Text chunking module
//!
//! Splits text into overlapping chunks for embedding. Boundaries come from
//! `text-splitter`, which prefers sentence and word breaks over hard cuts.
//! Offsets count Unicode scalar values, never bytes.

use ekip_common::config::ChunkingSettings;
use ekip_common::{AppError, Result};
use std::sync::Arc;
use text_splitter::{Characters, ChunkConfig, TextSplitter};
use tracing::debug;

/// Configuration for text chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Maximum overlap between consecutive chunks in characters
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl From<&ChunkingSettings> for ChunkingConfig {
    fn from(settings: &ChunkingSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
        }
    }
}

/// A text chunk with its position in the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Index of this chunk in the document
    pub index: usize,
    /// The chunk content, verbatim
    pub content: String,
    /// Start character offset (inclusive)
    pub start: usize,
    /// End character offset (exclusive)
    pub end: usize,
    /// 1-based page containing `start`
    pub page: Option<u32>,
}

/// Character offsets at which each page begins
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMap {
    starts: Vec<usize>,
}

impl PageMap {
    /// No page information
    pub fn none() -> Self {
        Self::default()
    }

    /// Page `i + 1` begins at `starts[i]`; offsets are sorted on construction
    pub fn from_starts(mut starts: Vec<usize>) -> Self {
        starts.sort_unstable();
        starts.dedup();
        Self { starts }
    }

    /// Join page texts with `separator`, recording where each page starts
    pub fn join_pages<S: AsRef<str>>(pages: &[S], separator: &str) -> (String, Self) {
        let mut text = String::new();
        let mut starts = Vec::with_capacity(pages.len());
        let mut offset = 0;
        let separator_len = separator.chars().count();

        for (i, page) in pages.iter().enumerate() {
            if i > 0 {
                text.push_str(separator);
                offset += separator_len;
            }
            starts.push(offset);
            text.push_str(page.as_ref());
            offset += page.as_ref().chars().count();
        }

        (text, Self { starts })
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn page_count(&self) -> usize {
        self.starts.len()
    }

    /// Page containing a character offset
    pub fn page_at(&self, offset: usize) -> Option<u32> {
        if self.starts.is_empty() {
            return None;
        }
        let pages_started = self.starts.partition_point(|&start| start <= offset);
        Some(pages_started.max(1) as u32)
    }
}

/// Splits text into overlapping chunks on semantic boundaries
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(AppError::Configuration {
                message: "chunk_size must be greater than zero".to_string(),
            });
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(AppError::Configuration {
                message: format!(
                    "chunk_overlap ({}) must be smaller than chunk_size ({})",
                    config.chunk_overlap, config.chunk_size
                ),
            });
        }
        splitter_config(&config)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Chunk `text`; boundaries are found up front, content is copied as the
    /// iterator advances and cloning the iterator restarts from its position
    pub fn chunks<'a>(&self, text: &'a str, pages: &'a PageMap) -> Result<Chunks<'a>> {
        if text.trim().is_empty() {
            return Err(AppError::EmptyInput {
                what: "document text".to_string(),
            });
        }

        let splitter = TextSplitter::new(splitter_config(&self.config)?);
        let spans = stitch(
            char_spans(text, splitter.chunk_indices(text)),
            text,
            self.config.chunk_overlap,
        );

        debug!(
            input_len = text.len(),
            chunk_count = spans.len(),
            chunk_size = self.config.chunk_size,
            chunk_overlap = self.config.chunk_overlap,
            "Text chunked"
        );

        Ok(Chunks {
            text,
            spans: spans.into(),
            pages,
            position: 0,
        })
    }
}

fn splitter_config(config: &ChunkingConfig) -> Result<ChunkConfig<Characters>> {
    ChunkConfig::new(config.chunk_size)
        .with_overlap(config.chunk_overlap)
        .map(|c| c.with_trim(false))
        .map_err(|e| AppError::Configuration {
            message: format!("invalid chunking config: {}", e),
        })
}

/// Boundaries of one chunk, in bytes and in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    byte_start: usize,
    byte_end: usize,
    start: usize,
    end: usize,
}

/// Convert the splitter's byte offsets into character offsets
fn char_spans<'t>(text: &str, chunks: impl Iterator<Item = (usize, &'t str)>) -> Vec<Span> {
    let mut spans = Vec::new();
    let (mut cursor_byte, mut cursor_char) = (0, 0);

    for (byte_start, chunk) in chunks {
        if chunk.is_empty() || byte_start < cursor_byte {
            continue;
        }
        cursor_char += text[cursor_byte..byte_start].chars().count();
        cursor_byte = byte_start;
        spans.push(Span {
            byte_start,
            byte_end: byte_start + chunk.len(),
            start: cursor_char,
            end: cursor_char + chunk.chars().count(),
        });
    }
    spans
}

/// Close any gap the splitter leaves between chunks, anchor the first chunk
/// at the start of text and fold a tail of at most `overlap` new characters
/// into the chunk before it
fn stitch(mut spans: Vec<Span>, text: &str, overlap: usize) -> Vec<Span> {
    let Some(first) = spans.first_mut() else {
        return spans;
    };
    first.byte_start = 0;
    first.start = 0;

    for i in 1..spans.len() {
        let previous = spans[i - 1];
        if spans[i].start > previous.end {
            spans[i].start = previous.end;
            spans[i].byte_start = previous.byte_end;
        }
    }

    if let Some(last) = spans.last_mut() {
        if last.byte_end < text.len() {
            last.end += text[last.byte_end..].chars().count();
            last.byte_end = text.len();
        }
    }

    if spans.len() >= 2 {
        let last = spans[spans.len() - 1];
        let previous = spans[spans.len() - 2];
        if last.end - previous.end <= overlap {
            spans.pop();
            if let Some(previous) = spans.last_mut() {
                previous.end = last.end;
                previous.byte_end = last.byte_end;
            }
        }
    }
    spans
}

/// Iterator over the chunks of one text
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    spans: Arc<[Span]>,
    pages: &'a PageMap,
    position: usize,
}

impl Iterator for Chunks<'_> {
    type Item = TextChunk;

    fn next(&mut self) -> Option<Self::Item> {
        let span = *self.spans.get(self.position)?;

        let chunk = TextChunk {
            index: self.position,
            content: self.text[span.byte_start..span.byte_end].to_string(),
            start: span.start,
            end: span.end,
            page: self.pages.page_at(span.start),
        };
        self.position += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.spans.len() - self.position;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks<'_> {}

impl std::iter::FusedIterator for Chunks<'_> {}
