//! EKIP Ingestion
//!
//! Turns uploaded documents into indexed, access-tagged chunks:
//! - PDF text extraction behind [`pdf::PdfExtractor`]
//! - Character-offset chunking with overlap
//! - All-or-nothing ingestion with rollback
//! - Catalog of committed documents

pub mod catalog;
pub mod chunker;
pub mod pdf;
pub mod pipeline;

pub use catalog::DocumentCatalog;
pub use chunker::{Chunker, ChunkingConfig, PageMap, TextChunk};
pub use pdf::{ExtractedPdf, LopdfExtractor, PdfExtractor};
pub use pipeline::{IngestOutcome, IngestRequest, IngestionPipeline, PipelineConfig};
