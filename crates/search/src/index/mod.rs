//! Vector index abstraction
//!
//! An index stores chunk records with their embeddings and answers
//! top-k similarity queries restricted to a set of access tags.

mod memory;

pub use memory::InMemoryIndex;

use async_trait::async_trait;
use ekip_common::{AllowedTags, ChunkRecord, Result, SearchResult};
use uuid::Uuid;

/// Storage and similarity search over chunk embeddings
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Store one chunk.
    ///
    /// Fails with `DimensionMismatch` when the embedding length differs from
    /// the index dimension.
    async fn insert(&self, record: ChunkRecord) -> Result<()>;

    /// Top-k chunks by cosine similarity among those whose tag is allowed.
    ///
    /// Sorted by similarity descending; equal scores keep insertion order.
    async fn search(&self, query: &[f32], k: usize, allowed: &AllowedTags) -> Result<Vec<SearchResult>>;

    /// Remove every chunk of a document, returning how many were removed
    async fn delete(&self, document_id: Uuid) -> Result<usize>;

    /// Fixed embedding dimension, once known
    async fn dimension(&self) -> Option<usize>;

    /// Number of stored chunks
    async fn len(&self) -> usize;

    /// Number of distinct documents with stored chunks
    async fn document_count(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Scale a vector to unit length; a zero vector stays zero
pub(crate) fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vec![0.0; vector.len()];
    }
    vector.iter().map(|v| v / norm).collect()
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
