//! Answer composition
//!
//! Turns retrieved passages into a grounded answer:
//! - Empty retrieval short-circuits to a fixed answer without calling the generator
//! - Passages are numbered and budgeted by [`PromptBuilder`]
//! - Citation markers in the reply become the answer's sources

use crate::prompt::PromptBuilder;
use ekip_common::generation::GenerationRequest;
use ekip_common::{Answer, AppError, Generator, Result, SearchResult, Source};
use regex_lite::Regex;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Composer settings
#[derive(Debug, Clone)]
pub struct ComposerConfig {
    /// Character budget for passages placed in the prompt
    pub max_context_chars: usize,

    /// Deadline for one generator call
    pub generation_timeout: Duration,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            max_context_chars: 6000,
            generation_timeout: Duration::from_secs(30),
        }
    }
}

fn citation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[(?:Source\s*)?(\d+)\]").expect("citation pattern is valid")
    })
}

/// Passage numbers cited in `reply`, first appearance order, without duplicates
pub fn cited_passages(reply: &str, passage_count: usize) -> Vec<usize> {
    let mut cited = Vec::new();
    for captures in citation_pattern().captures_iter(reply) {
        let Some(number) = captures.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) else {
            continue;
        };
        if (1..=passage_count).contains(&number) && !cited.contains(&number) {
            cited.push(number);
        }
    }
    cited
}

/// Produces grounded answers from retrieved passages
#[derive(Debug, Clone)]
pub struct AnswerComposer {
    prompts: PromptBuilder,
    generation_timeout: Duration,
}

impl AnswerComposer {
    pub fn new(config: ComposerConfig) -> Self {
        Self {
            prompts: PromptBuilder::new(config.max_context_chars),
            generation_timeout: config.generation_timeout,
        }
    }

    /// Answer `query` from `results`, citing the passages the reply refers to
    #[instrument(skip(self, query, results, generator), fields(passages = results.len()))]
    pub async fn compose(
        &self,
        query: &str,
        results: &[SearchResult],
        generator: &dyn Generator,
    ) -> Result<Answer> {
        if results.is_empty() {
            debug!("No passages retrieved, skipping generation");
            return Ok(Answer::no_relevant_information());
        }

        let context = self.prompts.build_context(results);
        let request = GenerationRequest {
            system: self.prompts.system_prompt().to_string(),
            prompt: self.prompts.user_prompt(query, &context),
            question: query.to_string(),
            passages: context.passages.clone(),
        };

        let started = Instant::now();
        let reply = tokio::time::timeout(self.generation_timeout, generator.complete(&request))
            .await
            .map_err(|_| AppError::Timeout {
                operation: "answer generation".to_string(),
                timeout_ms: self.generation_timeout.as_millis() as u64,
            })??;

        let supplied = &results[..context.len()];
        let cited = cited_passages(&reply, supplied.len());
        let sources: Vec<Source> = if cited.is_empty() {
            supplied.iter().map(Source::from).collect()
        } else {
            cited.iter().map(|&n| Source::from(&supplied[n - 1])).collect()
        };

        debug!(
            supplied = supplied.len(),
            cited = cited.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            model = generator.model_name(),
            "Answer composed"
        );

        Ok(Answer {
            text: reply,
            sources,
        })
    }
}
