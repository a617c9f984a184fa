//! Answer generation collaborators
//!
//! The composer hands a numbered-passage prompt to a [`Generator`] and maps
//! the citation markers in its reply back to sources. Two backends exist:
//! an OpenAI-compatible chat completions client and an offline extractive
//! generator that quotes the best matching sentence.

use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything a generator needs for one answer
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// System instructions
    pub system: String,

    /// User prompt carrying the numbered passages and the question
    pub prompt: String,

    /// The user's question as asked
    pub question: String,

    /// Passage texts in prompt order; passage `i` is cited as `[i + 1]`
    pub passages: Vec<String>,
}

/// Trait for answer generation
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce an answer text, citing passages with `[n]`
    async fn complete(&self, request: &GenerationRequest) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// OpenAI-compatible chat completions client
pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
}

impl ChatCompletionsGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::Configuration {
                message: "generation.api_key is required for provider 'openai'".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    async fn call_llm(&self, request: &GenerationRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Generation {
                message: format!("LLM API request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Generation {
                message: format!("LLM API error {}: {}", status, body),
            });
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| AppError::Generation {
            message: format!("Failed to parse LLM response: {}", e),
        })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| AppError::Generation {
                message: "Empty response from LLM".to_string(),
            })
    }
}

#[async_trait]
impl Generator for ChatCompletionsGenerator {
    #[tracing::instrument(skip(self, request), fields(model = %self.model, passages = request.passages.len()))]
    async fn complete(&self, request: &GenerationRequest) -> Result<String> {
        let start = Instant::now();
        let result = self.call_llm(request).await;
        crate::metrics::record_generation(start.elapsed().as_secs_f64(), &self.model, result.is_ok());
        result
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Offline generator quoting the passage sentence that best matches the question
#[derive(Debug, Default, Clone)]
pub struct ExtractiveGenerator;

impl ExtractiveGenerator {
    pub fn new() -> Self {
        Self
    }

    fn terms(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() > 2)
            .map(|t| t.to_lowercase())
            .collect()
    }

    fn sentences(passage: &str) -> impl Iterator<Item = &str> {
        passage
            .split_inclusive(['.', '!', '?', '\n'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[async_trait]
impl Generator for ExtractiveGenerator {
    async fn complete(&self, request: &GenerationRequest) -> Result<String> {
        let question_terms = Self::terms(&request.question);

        let mut best: Option<(usize, usize, &str)> = None;
        for (index, passage) in request.passages.iter().enumerate() {
            for sentence in Self::sentences(passage) {
                let sentence_terms = Self::terms(sentence);
                let score = question_terms
                    .iter()
                    .filter(|term| sentence_terms.contains(term))
                    .count();
                if best.map_or(true, |(_, top, _)| score > top) {
                    best = Some((index, score, sentence));
                }
            }
        }

        let (index, _, sentence) = best.ok_or_else(|| AppError::Generation {
            message: "no passages to answer from".to_string(),
        })?;

        Ok(format!("According to the documents: {} [{}]", sentence, index + 1))
    }

    fn model_name(&self) -> &str {
        "extractive"
    }
}

/// Create a generator based on configuration
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.to_ascii_lowercase().as_str() {
        "extractive" => Ok(Arc::new(ExtractiveGenerator::new())),
        "openai" => Ok(Arc::new(ChatCompletionsGenerator::new(config)?)),
        other => Err(AppError::Configuration {
            message: format!("unknown generation provider '{}'", other),
        }),
    }
}
