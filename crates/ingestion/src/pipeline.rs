//! Document ingestion pipeline
//!
//! Chunk, embed and index one document. Chunks are written one at a time and
//! a document only becomes visible in the catalog once every chunk is stored.
//! Any failure after the first write removes what was written, including when
//! the ingest future is dropped mid-way.

use crate::catalog::DocumentCatalog;
use crate::chunker::{Chunker, ChunkingConfig, PageMap, TextChunk};
use chrono::Utc;
use ekip_common::{
    AccessPolicy, AccessTag, AppConfig, AppError, ChunkRecord, Document, Embedder, Result, Role,
};
use ekip_search::VectorIndex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Pipeline tuning
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chunking: ChunkingConfig,
    /// Deadline for the batch embedding call
    pub embed_timeout: Duration,
    /// Deadline for writing every chunk to the index
    pub ingest_timeout: Duration,
}

impl PipelineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            chunking: ChunkingConfig::from(&config.chunking),
            embed_timeout: config.embedding_timeout(),
            ingest_timeout: config.ingestion_timeout(),
        }
    }
}

/// One document to ingest
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub text: String,
    pub filename: String,
    pub doc_type: AccessTag,
    pub uploaded_by: Role,
    pub pages: PageMap,
}

/// Result of a committed ingestion
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub document: Document,
    pub chunks_created: usize,
    pub character_count: usize,
}

/// Deletes a document's chunks unless disarmed
pub struct RollbackGuard {
    index: Option<Arc<dyn VectorIndex>>,
    document_id: Uuid,
}

impl RollbackGuard {
    pub fn new(index: Arc<dyn VectorIndex>, document_id: Uuid) -> Self {
        Self {
            index: Some(index),
            document_id,
        }
    }

    /// Keep the written chunks
    pub fn disarm(mut self) {
        self.index = None;
    }

    /// Remove the written chunks now
    pub async fn rollback(mut self) {
        if let Some(index) = self.index.take() {
            ekip_common::metrics::record_ingestion_rollback();
            match index.delete(self.document_id).await {
                Ok(removed) => info!(document_id = %self.document_id, removed, "Rolled back partial ingestion"),
                Err(e) => error!(document_id = %self.document_id, error = %e, "Rollback failed"),
            }
        }
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        let Some(index) = self.index.take() else {
            return;
        };
        let document_id = self.document_id;
        ekip_common::metrics::record_ingestion_rollback();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(%document_id, "Ingestion abandoned, scheduling rollback");
                handle.spawn(async move {
                    if let Err(e) = index.delete(document_id).await {
                        error!(%document_id, error = %e, "Rollback failed");
                    }
                });
            }
            Err(_) => {
                error!(%document_id, "Ingestion abandoned outside a runtime, chunks left in index");
            }
        }
    }
}

/// Chunk, embed and index documents
///
/// Chunks are inserted one at a time, so a concurrent search may return a
/// chunk of a document that has not committed yet. If that document is then
/// rolled back its chunks disappear from later searches. Only committed
/// documents appear in the catalog.
pub struct IngestionPipeline {
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    catalog: Arc<DocumentCatalog>,
    policy: Arc<AccessPolicy>,
    embed_timeout: Duration,
    ingest_timeout: Duration,
}

impl IngestionPipeline {
    pub fn new(
        config: PipelineConfig,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        catalog: Arc<DocumentCatalog>,
        policy: Arc<AccessPolicy>,
    ) -> Result<Self> {
        Ok(Self {
            chunker: Chunker::new(config.chunking)?,
            embedder,
            index,
            catalog,
            policy,
            embed_timeout: config.embed_timeout,
            ingest_timeout: config.ingest_timeout,
        })
    }

    pub fn catalog(&self) -> &Arc<DocumentCatalog> {
        &self.catalog
    }

    /// Ingest one document, all or nothing
    #[instrument(skip(self, request), fields(filename = %request.filename, doc_type = %request.doc_type))]
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome> {
        let started = Instant::now();
        let result = self.run(request).await;
        match &result {
            Ok(outcome) => {
                ekip_common::metrics::record_ingestion(
                    started.elapsed().as_secs_f64(),
                    outcome.chunks_created,
                    outcome.document.doc_type.as_str(),
                );
                info!(
                    document_id = %outcome.document.id,
                    chunks = outcome.chunks_created,
                    characters = outcome.character_count,
                    "Document ingested"
                );
            }
            Err(e) => {
                ekip_common::metrics::record_ingestion_failure(&format!("{:?}", e.code()));
                warn!(error = %e, "Ingestion failed");
            }
        }
        result
    }

    async fn run(&self, request: IngestRequest) -> Result<IngestOutcome> {
        let IngestRequest {
            text,
            filename,
            doc_type,
            uploaded_by,
            pages,
        } = request;

        if doc_type.is_empty() || !self.policy.is_known_tag(&doc_type) {
            return Err(AppError::validation(
                "doc_type",
                format!("Unknown document type '{}'", doc_type),
            ));
        }
        self.policy.allowed_tags(&uploaded_by)?;

        let character_count = text.chars().count();
        let chunks: Vec<TextChunk> = self
            .chunker
            .chunks(&text, &pages)?
            .filter(|chunk| !chunk.content.trim().is_empty())
            .collect();
        debug!(chunks = chunks.len(), characters = character_count, "Text chunked");

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = tokio::time::timeout(self.embed_timeout, self.embedder.embed_many(&texts))
            .await
            .map_err(|_| AppError::Timeout {
                operation: "document embedding".to_string(),
                timeout_ms: self.embed_timeout.as_millis() as u64,
            })??;

        if embeddings.len() != chunks.len() {
            return Err(AppError::embedding(format!(
                "expected {} embeddings, received {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let expected = match self.index.dimension().await {
            Some(dimension) => dimension,
            None => self.embedder.dimension(),
        };
        if let Some(bad) = embeddings.iter().find(|e| e.len() != expected) {
            return Err(AppError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        let document_id = Uuid::new_v4();
        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| ChunkRecord {
                id: Uuid::new_v4(),
                document_id,
                filename: filename.clone(),
                chunk_index: chunk.index,
                text: chunk.content,
                page: chunk.page,
                embedding,
                access_tag: doc_type.clone(),
            })
            .collect();
        let chunks_created = records.len();

        let guard = RollbackGuard::new(Arc::clone(&self.index), document_id);
        let write = async {
            for record in records {
                self.index.insert(record).await?;
                tokio::task::yield_now().await;
            }
            Ok::<(), AppError>(())
        };

        match tokio::time::timeout(self.ingest_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                guard.rollback().await;
                return Err(e);
            }
            Err(_) => {
                guard.rollback().await;
                return Err(AppError::Timeout {
                    operation: "document indexing".to_string(),
                    timeout_ms: self.ingest_timeout.as_millis() as u64,
                });
            }
        }

        let document = Document {
            id: document_id,
            filename,
            doc_type,
            uploaded_by: uploaded_by.to_string(),
            uploaded_at: Utc::now(),
            character_count,
            chunk_count: chunks_created,
        };
        self.catalog.register(document.clone()).await;
        guard.disarm();

        Ok(IngestOutcome {
            document,
            chunks_created,
            character_count,
        })
    }

    /// Remove a document from the index and the catalog
    #[instrument(skip(self))]
    pub async fn remove_document(&self, id: Uuid) -> Result<Document> {
        let removed = self.index.delete(id).await?;
        let document = self.catalog.remove(id).await.ok_or_else(|| AppError::NotFound {
            resource_type: "document".to_string(),
            id: id.to_string(),
        })?;
        info!(chunks = removed, "Document removed");
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ekip_common::config::AccessConfig;
    use ekip_common::embeddings::HashEmbedder;
    use ekip_common::{AllowedTags, SearchResult};
    use ekip_search::InMemoryIndex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    const DIM: usize = 32;

    fn config() -> PipelineConfig {
        PipelineConfig {
            chunking: ChunkingConfig {
                chunk_size: 200,
                chunk_overlap: 50,
            },
            embed_timeout: Duration::from_secs(5),
            ingest_timeout: Duration::from_secs(5),
        }
    }

    fn policy() -> Arc<AccessPolicy> {
        Arc::new(AccessPolicy::from_config(&AccessConfig::default()).unwrap())
    }

    fn pipeline_with(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> IngestionPipeline {
        IngestionPipeline::new(config(), embedder, index, Arc::new(DocumentCatalog::new()), policy()).unwrap()
    }

    fn request(text: String, doc_type: &str) -> IngestRequest {
        IngestRequest {
            text,
            filename: "handbook.pdf".to_string(),
            doc_type: AccessTag::new(doc_type),
            uploaded_by: Role::new("Admin"),
            pages: PageMap::none(),
        }
    }

    /// Index that fails every insert after the first `limit`
    struct FailingIndex {
        inner: InMemoryIndex,
        limit: usize,
        inserts: AtomicUsize,
    }

    #[async_trait]
    impl VectorIndex for FailingIndex {
        async fn insert(&self, record: ChunkRecord) -> Result<()> {
            if self.inserts.fetch_add(1, Ordering::SeqCst) >= self.limit {
                return Err(AppError::Internal {
                    message: "disk full".to_string(),
                });
            }
            self.inner.insert(record).await
        }

        async fn search(&self, query: &[f32], k: usize, allowed: &AllowedTags) -> Result<Vec<SearchResult>> {
            self.inner.search(query, k, allowed).await
        }

        async fn delete(&self, document_id: Uuid) -> Result<usize> {
            self.inner.delete(document_id).await
        }

        async fn dimension(&self) -> Option<usize> {
            self.inner.dimension().await
        }

        async fn len(&self) -> usize {
            self.inner.len().await
        }

        async fn document_count(&self) -> usize {
            self.inner.document_count().await
        }
    }

    /// Embedder returning vectors of the wrong length
    struct WrongDimensionEmbedder;

    #[async_trait]
    impl Embedder for WrongDimensionEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0; DIM + 1])
        }

        async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0; DIM + 1]).collect())
        }

        fn model_name(&self) -> &str {
            "wrong"
        }

        fn dimension(&self) -> usize {
            DIM
        }
    }

    /// Embedder that never answers in time
    struct StalledEmbedder;

    #[async_trait]
    impl Embedder for StalledEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![0.0; DIM])
        }

        async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![vec![0.0; DIM]; texts.len()])
        }

        fn model_name(&self) -> &str {
            "stalled"
        }

        fn dimension(&self) -> usize {
            DIM
        }
    }

    #[tokio::test]
    async fn test_thousand_chars_make_six_chunks() {
        let index = Arc::new(InMemoryIndex::with_dimension(DIM));
        let pipeline = pipeline_with(Arc::new(HashEmbedder::new(DIM)), index.clone());

        let outcome = pipeline.ingest(request("x".repeat(1000), "HR")).await.unwrap();
        assert_eq!(outcome.chunks_created, 6);
        assert_eq!(outcome.character_count, 1000);
        assert_eq!(outcome.document.chunk_count, 6);
        assert_eq!(index.len().await, 6);
        assert_eq!(pipeline.catalog().get(outcome.document.id).await, Some(outcome.document));
    }

    #[tokio::test]
    async fn test_unknown_doc_type_and_role_rejected() {
        let index = Arc::new(InMemoryIndex::new());
        let pipeline = pipeline_with(Arc::new(HashEmbedder::new(DIM)), index.clone());

        let err = pipeline.ingest(request("text ".repeat(50), "Finance")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        let mut guest = request("text ".repeat(50), "HR");
        guest.uploaded_by = Role::new("Guest");
        let err = pipeline.ingest(guest).await.unwrap_err();
        assert!(matches!(err, AppError::UnknownRole { .. }));
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let pipeline = pipeline_with(Arc::new(HashEmbedder::new(DIM)), Arc::new(InMemoryIndex::new()));
        let err = pipeline.ingest(request("   ".to_string(), "HR")).await.unwrap_err();
        assert!(matches!(err, AppError::EmptyInput { .. }));
    }

    #[tokio::test]
    async fn test_dimension_checked_before_any_write() {
        let index = Arc::new(InMemoryIndex::new());
        let pipeline = pipeline_with(Arc::new(WrongDimensionEmbedder), index.clone());

        let err = pipeline.ingest(request("word ".repeat(100), "HR")).await.unwrap_err();
        assert!(matches!(err, AppError::DimensionMismatch { expected: 32, actual: 33 }));
        assert!(index.is_empty().await);
        assert!(pipeline.catalog().is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let index = Arc::new(FailingIndex {
            inner: InMemoryIndex::with_dimension(DIM),
            limit: 2,
            inserts: AtomicUsize::new(0),
        });
        let pipeline = pipeline_with(Arc::new(HashEmbedder::new(DIM)), index.clone());

        let err = pipeline.ingest(request("y".repeat(1000), "HR")).await.unwrap_err();
        assert!(matches!(err, AppError::Internal { .. }));
        assert_eq!(index.len().await, 0);
        assert!(pipeline.catalog().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_embedding_timeout() {
        let index = Arc::new(InMemoryIndex::new());
        let pipeline = pipeline_with(Arc::new(StalledEmbedder), index.clone());

        let err = pipeline.ingest(request("z".repeat(500), "HR")).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout { timeout_ms: 5000, .. }));
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn test_dropped_guard_schedules_delete() {
        let index = Arc::new(InMemoryIndex::new());
        let document_id = Uuid::new_v4();
        index
            .insert(ChunkRecord {
                id: Uuid::new_v4(),
                document_id,
                filename: "partial.pdf".into(),
                chunk_index: 0,
                text: "partial".into(),
                page: None,
                embedding: vec![1.0, 0.0],
                access_tag: AccessTag::new("HR"),
            })
            .await
            .unwrap();

        drop(RollbackGuard::new(index.clone(), document_id));
        for _ in 0..10 {
            tokio::task::yield_now().await;
            if index.is_empty().await {
                break;
            }
        }
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_document() {
        let index = Arc::new(InMemoryIndex::with_dimension(DIM));
        let pipeline = pipeline_with(Arc::new(HashEmbedder::new(DIM)), index.clone());
        let outcome = pipeline.ingest(request("leave ".repeat(100), "Employee")).await.unwrap();

        let removed = assert_ok!(pipeline.remove_document(outcome.document.id).await);
        assert_eq!(removed.id, outcome.document.id);
        assert!(index.is_empty().await);

        let err = assert_err!(pipeline.remove_document(outcome.document.id).await);
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    /// Counts rollbacks reported through the metrics facade
    #[derive(Default)]
    struct RollbackRecorder {
        rollbacks: Arc<AtomicU64>,
    }

    impl metrics::Recorder for RollbackRecorder {
        fn describe_counter(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}

        fn describe_gauge(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}

        fn describe_histogram(&self, _: metrics::KeyName, _: Option<metrics::Unit>, _: metrics::SharedString) {}

        fn register_counter(&self, key: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Counter {
            if key.name() == "ekip_ingestion_rollbacks_total" {
                metrics::Counter::from_arc(self.rollbacks.clone())
            } else {
                metrics::Counter::noop()
            }
        }

        fn register_gauge(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Gauge {
            metrics::Gauge::noop()
        }

        fn register_histogram(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Histogram {
            metrics::Histogram::noop()
        }
    }

    #[test]
    fn test_rollback_metric_counts_only_written_documents() {
        let recorder = RollbackRecorder::default();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let pipeline = pipeline_with(Arc::new(HashEmbedder::new(DIM)), Arc::new(InMemoryIndex::new()));
                assert_err!(pipeline.ingest(request("text ".repeat(50), "Finance")).await);
                assert_err!(pipeline.ingest(request("   ".to_string(), "HR")).await);
                assert_ok!(pipeline.ingest(request("leave ".repeat(100), "HR")).await);
            })
        });
        assert_eq!(recorder.rollbacks.load(Ordering::SeqCst), 0);

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let index = Arc::new(FailingIndex {
                    inner: InMemoryIndex::with_dimension(DIM),
                    limit: 2,
                    inserts: AtomicUsize::new(0),
                });
                let pipeline = pipeline_with(Arc::new(HashEmbedder::new(DIM)), index);
                assert_err!(pipeline.ingest(request("y".repeat(1000), "HR")).await);
            })
        });
        assert_eq!(recorder.rollbacks.load(Ordering::SeqCst), 1);
    }
}
