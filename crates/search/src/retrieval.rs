//! Role-filtered retrieval
//!
//! Resolves the caller's role to its access tags, embeds the query and runs a
//! filtered top-k search. Access is decided before any embedding work, so an
//! unknown role never reaches a collaborator.

use crate::index::VectorIndex;
use ekip_common::{AccessPolicy, AppError, Embedder, Result, Role, SearchResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Answers similarity queries on behalf of a role
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    policy: Arc<AccessPolicy>,
    embed_timeout: Duration,
}

impl Retriever {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        policy: Arc<AccessPolicy>,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            index,
            embedder,
            policy,
            embed_timeout,
        }
    }

    /// Top-k passages visible to `role`, most similar first
    #[instrument(skip(self, query), fields(role = %role))]
    pub async fn retrieve(&self, query: &str, role: &Role, k: usize) -> Result<Vec<SearchResult>> {
        let allowed = self.policy.allowed_tags(role)?;

        if query.trim().is_empty() {
            return Err(AppError::EmptyInput {
                what: "query".to_string(),
            });
        }

        let start = Instant::now();
        let embedding = tokio::time::timeout(self.embed_timeout, self.embedder.embed(query))
            .await
            .map_err(|_| AppError::Timeout {
                operation: "query embedding".to_string(),
                timeout_ms: self.embed_timeout.as_millis() as u64,
            })??;

        if embedding.len() != self.embedder.dimension() {
            return Err(AppError::DimensionMismatch {
                expected: self.embedder.dimension(),
                actual: embedding.len(),
            });
        }

        let results = self.index.search(&embedding, k, &allowed).await?;

        debug!(
            results = results.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Retrieval complete"
        );

        Ok(results)
    }
}

/// Similarity floor for a query, relaxed for short queries.
///
/// Three words or fewer use `max(base - 0.15, 0.4)`, up to six words use
/// `max(base - 0.05, 0.5)`, longer queries use `base` unchanged.
pub fn effective_threshold(query: &str, base: f32) -> f32 {
    match query.split_whitespace().count() {
        0..=3 => (base - 0.15).max(0.4),
        4..=6 => (base - 0.05).max(0.5),
        _ => base,
    }
}

/// Drop results below the query's effective threshold
pub fn apply_threshold(results: Vec<SearchResult>, query: &str, base: f32) -> Vec<SearchResult> {
    let threshold = effective_threshold(query, base);
    let before = results.len();
    let kept: Vec<SearchResult> = results
        .into_iter()
        .filter(|r| r.similarity >= threshold)
        .collect();
    debug!(threshold, before, after = kept.len(), "Applied similarity threshold");
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::InMemoryIndex;
    use async_trait::async_trait;
    use ekip_common::config::AccessConfig;
    use ekip_common::embeddings::HashEmbedder;
    use ekip_common::{AccessTag, ChunkRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Counts calls so tests can assert the embedder was never reached
    struct CountingEmbedder {
        inner: HashEmbedder,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl CountingEmbedder {
        fn new(delay: Option<Duration>) -> Self {
            Self {
                inner: HashEmbedder::new(64),
                calls: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.inner.embed(text).await
        }

        async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.inner.embed_many(texts).await
        }

        fn model_name(&self) -> &str {
            "counting"
        }

        fn dimension(&self) -> usize {
            64
        }
    }

    async fn seeded(embedder: Arc<CountingEmbedder>) -> Retriever {
        let index = Arc::new(InMemoryIndex::new());
        let passages = [
            ("Employee", "Employees receive 25 days of annual leave."),
            ("HR", "Salary bands are reviewed every April by HR."),
            ("Admin", "Root credentials rotate every 90 days."),
        ];
        let texts: Vec<String> = passages.iter().map(|(_, t)| t.to_string()).collect();
        let vectors = embedder.embed_many(&texts).await.unwrap();
        for ((tag, text), embedding) in passages.iter().zip(vectors) {
            index
                .insert(ChunkRecord {
                    id: Uuid::new_v4(),
                    document_id: Uuid::new_v4(),
                    filename: format!("{}.pdf", tag.to_lowercase()),
                    chunk_index: 0,
                    text: text.to_string(),
                    page: Some(1),
                    embedding,
                    access_tag: AccessTag::new(tag),
                })
                .await
                .unwrap();
        }

        let policy = Arc::new(AccessPolicy::from_config(&AccessConfig::default()).unwrap());
        Retriever::new(index, embedder, policy, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_results_respect_role() {
        let retriever = seeded(Arc::new(CountingEmbedder::new(None))).await;

        let results = retriever
            .retrieve("salary bands", &Role::new("Employee"), 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.iter().all(|r| r.chunk.access_tag == AccessTag::new("Employee")));

        let results = retriever.retrieve("salary bands", &Role::new("HR"), 10).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.access_tag, AccessTag::new("HR"));

        let results = retriever.retrieve("salary bands", &Role::new("Admin"), 10).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_role_fails_before_embedding() {
        let embedder = Arc::new(CountingEmbedder::new(None));
        let retriever = seeded(Arc::clone(&embedder)).await;

        let err = retriever
            .retrieve("annual leave", &Role::new("Guest"), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnknownRole { .. }));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let retriever = seeded(Arc::new(CountingEmbedder::new(None))).await;
        let err = retriever.retrieve("   ", &Role::new("HR"), 5).await.unwrap_err();
        assert!(matches!(err, AppError::EmptyInput { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_embedding_times_out() {
        let embedder = Arc::new(CountingEmbedder::new(Some(Duration::from_secs(5))));
        let retriever = seeded(embedder).await;
        let err = retriever
            .retrieve("annual leave", &Role::new("HR"), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout { timeout_ms: 1000, .. }));
    }

    #[test]
    fn test_effective_threshold() {
        assert!((effective_threshold("leave policy", 0.7) - 0.55).abs() < 1e-6);
        assert!((effective_threshold("leave policy", 0.5) - 0.4).abs() < 1e-6);
        assert!((effective_threshold("how much annual leave do", 0.7) - 0.65).abs() < 1e-6);
        assert!((effective_threshold("how much annual leave do", 0.52) - 0.5).abs() < 1e-6);
        assert_eq!(effective_threshold("how many days of annual leave do I get", 0.7), 0.7);
    }

    #[test]
    fn test_apply_threshold_drops_weak_matches() {
        let make = |similarity: f32| SearchResult {
            chunk: Arc::new(ChunkRecord {
                id: Uuid::new_v4(),
                document_id: Uuid::new_v4(),
                filename: "a.pdf".into(),
                chunk_index: 0,
                text: "text".into(),
                page: None,
                embedding: vec![1.0],
                access_tag: AccessTag::new("HR"),
            }),
            similarity,
        };
        let kept = apply_threshold(vec![make(0.9), make(0.5), make(0.3)], "leave", 0.6);
        assert_eq!(kept.len(), 2);
    }
}
