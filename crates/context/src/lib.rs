//! EKIP Context Engine
//!
//! Builds numbered-passage prompts from retrieved chunks, calls the answer
//! generator and maps its citation markers back to sources.

pub mod composer;
pub mod prompt;

pub use composer::{AnswerComposer, ComposerConfig};
pub use prompt::{PromptBuilder, PromptContext};
