//! EKIP Common Library
//!
//! Shared code for all EKIP crates including:
//! - Domain models (documents, chunks, search results, answers)
//! - Role-based access policy
//! - Embedding and generation collaborator abstractions
//! - Error types and handling
//! - Configuration management
//! - Input guards
//! - Metrics and observability

pub mod access;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod generation;
pub mod guard;
pub mod metrics;
pub mod models;

// Re-export commonly used types
pub use access::{AccessPolicy, AccessTag, AllowedTags, Role};
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use generation::Generator;
pub use models::{Answer, ChunkRecord, Document, SearchResult, Source};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

/// Fixed answer returned when retrieval finds nothing the caller may see
pub const NO_RELEVANT_INFORMATION: &str = "No relevant information found.";
