//! EKIP Search
//!
//! Vector storage and role-filtered retrieval:
//! - [`index::VectorIndex`] trait with an in-memory, snapshot-consistent implementation
//! - [`retrieval::Retriever`] resolving roles, embedding queries and searching
//! - Adaptive similarity threshold for short queries

pub mod index;
pub mod retrieval;

pub use index::{InMemoryIndex, VectorIndex};
pub use retrieval::{apply_threshold, effective_threshold, Retriever};
