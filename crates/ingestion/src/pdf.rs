//! PDF text extraction module
//!
//! Extracts per-page text from uploaded PDF bytes using lopdf.

use crate::chunker::PageMap;
use ekip_common::{AppError, Result};
use tracing::{debug, warn};

/// Magic bytes every PDF starts with
pub const PDF_MAGIC: &[u8] = b"%PDF-";

/// Text recovered from a PDF, one entry per page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedPdf {
    pub pages: Vec<String>,
}

impl ExtractedPdf {
    /// Full text with pages separated by a newline, plus where each page starts
    pub fn into_text(self) -> (String, PageMap) {
        PageMap::join_pages(&self.pages, "\n")
    }

    pub fn character_count(&self) -> usize {
        self.pages.iter().map(|p| p.chars().count()).sum()
    }
}

/// Turns PDF bytes into page text
pub trait PdfExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedPdf>;
}

/// Best-effort extractor backed by lopdf
#[derive(Debug, Default, Clone)]
pub struct LopdfExtractor;

impl LopdfExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl PdfExtractor for LopdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedPdf> {
        if !bytes.starts_with(PDF_MAGIC) {
            return Err(AppError::InvalidFormat {
                message: "File is not a PDF".to_string(),
            });
        }

        let doc = lopdf::Document::load_mem(bytes).map_err(|e| AppError::InvalidFormat {
            message: format!("Failed to load PDF: {}", e),
        })?;

        let pages = doc.get_pages();
        debug!(page_count = pages.len(), "Extracting text from PDF");

        let mut extracted = Vec::with_capacity(pages.len());
        for (&page_num, &page_id) in pages.iter() {
            let text = match doc.extract_text(&[page_num]) {
                Ok(text) if !text.trim().is_empty() => text,
                _ => match doc.get_page_content(page_id) {
                    Ok(content) => extract_text_from_content(&content),
                    Err(e) => {
                        warn!(page = page_num, error = %e, "Failed to extract text from page, skipping");
                        String::new()
                    }
                },
            };
            extracted.push(clean_text(&text));
        }

        let result = ExtractedPdf { pages: extracted };
        debug!(chars = result.character_count(), "Text extraction complete");
        Ok(result)
    }
}

/// Extract text from a raw content stream, looking between BT and ET operators
fn extract_text_from_content(content: &[u8]) -> String {
    let content_str = String::from_utf8_lossy(content);
    let mut text = String::new();
    let mut in_text_block = false;
    let mut current_text = String::new();

    for line in content_str.lines() {
        let trimmed = line.trim();

        if trimmed == "BT" {
            in_text_block = true;
            continue;
        }

        if trimmed == "ET" {
            in_text_block = false;
            if !current_text.is_empty() {
                text.push_str(&current_text);
                text.push(' ');
                current_text.clear();
            }
            continue;
        }

        if in_text_block {
            if let Some(text_content) = extract_text_from_operator(trimmed) {
                current_text.push_str(&text_content);
            }
        }
    }

    text
}

/// Extract text from a `Tj`, `'`, `"` or `TJ` operator line
fn extract_text_from_operator(line: &str) -> Option<String> {
    if line.ends_with("Tj") || line.ends_with('\'') || line.ends_with('"') {
        let start = line.find('(')?;
        let end = line.rfind(')')?;
        if end > start {
            return Some(decode_pdf_string(&line[start + 1..end]));
        }
    }

    if line.ends_with("TJ") {
        let mut result = String::new();
        let mut in_paren = false;
        let mut current = String::new();

        for ch in line.chars() {
            match ch {
                '(' => in_paren = true,
                ')' => {
                    in_paren = false;
                    result.push_str(&decode_pdf_string(&current));
                    current.clear();
                }
                _ if in_paren => current.push(ch),
                _ => {}
            }
        }

        if !result.is_empty() {
            return Some(result);
        }
    }

    None
}

/// Decode PDF string escapes
fn decode_pdf_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some(c) => result.push(c),
            None => {}
        }
    }

    result
}

/// Collapse whitespace and drop BOMs and typographic quotes
fn clean_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{FEFF}', "")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
}
