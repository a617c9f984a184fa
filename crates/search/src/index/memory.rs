//! In-memory vector index using cosine similarity

use super::{dot, normalize, VectorIndex};
use async_trait::async_trait;
use ekip_common::{AllowedTags, AppError, ChunkRecord, Result, SearchResult};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

struct Entry {
    /// Insertion sequence, breaks similarity ties
    seq: u64,
    record: Arc<ChunkRecord>,
    unit: Vec<f32>,
}

#[derive(Default)]
struct State {
    dimension: Option<usize>,
    entries: Vec<Entry>,
    next_seq: u64,
}

/// Vector index held in process memory.
///
/// Unit vectors are cached at insert so a search is a dot product per
/// visible chunk. A search holds the read guard for its whole scan, so it
/// observes a single consistent snapshot of the index.
#[derive(Default)]
pub struct InMemoryIndex {
    state: RwLock<State>,
}

impl InMemoryIndex {
    /// Create an index whose dimension is fixed by the first insert
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index with a fixed dimension
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            state: RwLock::new(State {
                dimension: Some(dimension),
                ..State::default()
            }),
        }
    }
}

fn check_finite(vector: &[f32], what: &str) -> Result<()> {
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(AppError::validation(what, "vector contains non-finite values"));
    }
    Ok(())
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn insert(&self, record: ChunkRecord) -> Result<()> {
        check_finite(&record.embedding, "embedding")?;

        let mut state = self.state.write().await;
        let expected = *state.dimension.get_or_insert(record.embedding.len());
        if record.embedding.len() != expected {
            return Err(AppError::DimensionMismatch {
                expected,
                actual: record.embedding.len(),
            });
        }

        let unit = normalize(&record.embedding);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push(Entry {
            seq,
            record: Arc::new(record),
            unit,
        });
        ekip_common::metrics::record_index_size(state.entries.len());
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize, allowed: &AllowedTags) -> Result<Vec<SearchResult>> {
        check_finite(query, "query")?;

        let state = self.state.read().await;
        let Some(expected) = state.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != expected {
            return Err(AppError::DimensionMismatch {
                expected,
                actual: query.len(),
            });
        }
        if k == 0 || allowed.is_empty() {
            return Ok(Vec::new());
        }

        let unit = normalize(query);
        let mut scored: Vec<(f32, u64, &Arc<ChunkRecord>)> = state
            .entries
            .iter()
            .filter(|entry| allowed.contains(&entry.record.access_tag))
            .map(|entry| (dot(&unit, &entry.unit).clamp(-1.0, 1.0), entry.seq, &entry.record))
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(similarity, _, record)| SearchResult {
                chunk: Arc::clone(record),
                similarity,
            })
            .collect())
    }

    async fn delete(&self, document_id: Uuid) -> Result<usize> {
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|entry| entry.record.document_id != document_id);
        let removed = before - state.entries.len();
        if removed > 0 {
            tracing::debug!(%document_id, removed, "Removed chunks from index");
            ekip_common::metrics::record_index_size(state.entries.len());
        }
        Ok(removed)
    }

    async fn dimension(&self) -> Option<usize> {
        self.state.read().await.dimension
    }

    async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    async fn document_count(&self) -> usize {
        let state = self.state.read().await;
        state
            .entries
            .iter()
            .map(|entry| entry.record.document_id)
            .collect::<HashSet<_>>()
            .len()
    }
}
