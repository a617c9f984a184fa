//! Domain models shared across ingestion, search and answer composition

use crate::access::AccessTag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// An ingested document
///
/// Created once ingestion has committed every chunk; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: Uuid,

    /// Sanitized upload filename
    pub filename: String,

    /// Access classification inherited by every chunk
    pub doc_type: AccessTag,

    /// Role that uploaded the document
    pub uploaded_by: String,

    pub uploaded_at: DateTime<Utc>,

    /// Unicode scalar count of the extracted text
    pub character_count: usize,

    pub chunk_count: usize,
}

/// A stored passage with its embedding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub id: Uuid,

    /// Owning document
    pub document_id: Uuid,

    /// Filename of the owning document, kept for citations
    pub filename: String,

    /// Position of this chunk within its document
    pub chunk_index: usize,

    /// Verbatim passage text
    pub text: String,

    /// 1-based page covering the chunk's first character
    pub page: Option<u32>,

    pub embedding: Vec<f32>,

    pub access_tag: AccessTag,
}

/// A chunk matched by a similarity search
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk: Arc<ChunkRecord>,

    /// Cosine similarity in [-1, 1], higher is better
    pub similarity: f32,
}

/// A cited source in an answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub filename: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,

    pub similarity: f32,
}

impl From<&SearchResult> for Source {
    fn from(result: &SearchResult) -> Self {
        Self {
            filename: result.chunk.filename.clone(),
            page: result.chunk.page,
            similarity: result.similarity,
        }
    }
}

/// Grounded answer to one query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<Source>,
}

impl Answer {
    /// Answer returned when nothing visible to the caller matched
    pub fn no_relevant_information() -> Self {
        Self {
            text: crate::NO_RELEVANT_INFORMATION.to_string(),
            sources: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_from_search_result() {
        let chunk = ChunkRecord {
            id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            filename: "handbook.pdf".into(),
            chunk_index: 0,
            text: "Leave policy".into(),
            page: Some(4),
            embedding: vec![1.0, 0.0],
            access_tag: AccessTag::new("Employee"),
        };
        let result = SearchResult {
            chunk: Arc::new(chunk),
            similarity: 0.82,
        };

        let source = Source::from(&result);
        assert_eq!(source.filename, "handbook.pdf");
        assert_eq!(source.page, Some(4));
    }

    #[test]
    fn test_source_omits_missing_page() {
        let source = Source {
            filename: "notes.pdf".into(),
            page: None,
            similarity: 0.5,
        };
        let json = serde_json::to_value(&source).unwrap();
        assert!(json.get("page").is_none());
    }

    #[test]
    fn test_no_relevant_information_answer() {
        let answer = Answer::no_relevant_information();
        assert_eq!(answer.text, "No relevant information found.");
        assert!(answer.sources.is_empty());
    }
}
