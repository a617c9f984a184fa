//! Embedding service abstraction
//!
//! Provides a unified interface for multiple embedding providers:
//! - Feature hashing (offline, deterministic, the default)
//! - OpenAI-compatible `/embeddings` endpoints
//! - HuggingFace feature-extraction router (e.g. all-MiniLM-L6-v2)

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts, preserving input order.
    ///
    /// Fails as a whole when any item fails.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// Reject vectors that do not match the advertised dimension
fn check_dimension(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(AppError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

fn check_inputs(texts: &[String]) -> Result<()> {
    if let Some(index) = texts.iter().position(|t| t.trim().is_empty()) {
        return Err(AppError::Embedding {
            message: "cannot embed empty text".to_string(),
            index: Some(index),
        });
    }
    Ok(())
}

/// Deterministic feature-hashing embedder.
///
/// Words and adjacent word pairs are hashed into signed buckets and the
/// result is L2-normalized, so texts sharing vocabulary land close together.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn tokens(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect()
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens = Self::tokens(text);

        for token in &tokens {
            self.add_feature(&mut vector, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.add_feature(&mut vector, &format!("{} {}", pair[0], pair[1]), 0.5);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_many(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| AppError::embedding("Empty response"))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        check_inputs(texts)?;
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn model_name(&self) -> &str {
        "feature-hash"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Wire format spoken by an [`HttpEmbedder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpFlavor {
    /// `POST {base}/embeddings` with `{input, model}`
    OpenAi,
    /// `POST {base}/{model}` with `{"inputs": {"sentences": [...]}}`
    HuggingFace,
}

const OPENAI_BASE: &str = "https://api.openai.com/v1";
const HUGGINGFACE_BASE: &str = "https://router.huggingface.co/hf-inference/models";

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct HuggingFaceRequest<'a> {
    inputs: HuggingFaceInputs<'a>,
}

#[derive(Serialize)]
struct HuggingFaceInputs<'a> {
    sentences: &'a [String],
}

/// Remote embedding client with retry and batching
pub struct HttpEmbedder {
    client: reqwest::Client,
    flavor: HttpFlavor,
    url: String,
    api_key: String,
    model: String,
    dimension: usize,
    max_retries: u32,
    batch_size: usize,
    timeout: Duration,
}

impl HttpEmbedder {
    /// Create a new remote embedder
    pub fn new(flavor: HttpFlavor, config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::Configuration {
                message: format!("embedding.api_key is required for provider '{}'", config.provider),
            })?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let url = match flavor {
            HttpFlavor::OpenAi => {
                let base = config.api_base.as_deref().unwrap_or(OPENAI_BASE);
                format!("{}/embeddings", base.trim_end_matches('/'))
            }
            HttpFlavor::HuggingFace => {
                let base = config.api_base.as_deref().unwrap_or(HUGGINGFACE_BASE);
                format!("{}/{}", base.trim_end_matches('/'), config.model)
            }
        };

        Ok(Self {
            client,
            flavor,
            url,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            max_retries: config.max_retries,
            batch_size: config.batch_size.max(1),
            timeout,
        })
    }

    /// Make request with retry
    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(200))
            .with_max_interval(Duration::from_secs(5))
            .with_max_elapsed_time(Some(self.timeout * (self.max_retries + 1)))
            .build();

        let mut attempt = 0u32;
        let max_retries = self.max_retries;

        retry(policy, || {
            attempt += 1;
            let current = attempt;
            let request = self.make_request(texts);
            async move {
                match request.await {
                    Ok(vectors) => Ok(vectors),
                    Err(e) if is_transient(&e) && current <= max_retries => {
                        tracing::warn!(
                            attempt = current,
                            max_retries = max_retries,
                            error = %e,
                            "Embedding request failed, retrying"
                        );
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        })
        .await
    }

    async fn make_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let builder = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");

        let builder = match self.flavor {
            HttpFlavor::OpenAi => builder.json(&OpenAiRequest {
                input: texts,
                model: &self.model,
            }),
            HttpFlavor::HuggingFace => builder.json(&HuggingFaceRequest {
                inputs: HuggingFaceInputs { sentences: texts },
            }),
        };

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Embedding {
                message: format!("API error {}: {}", status, body),
                index: None,
            });
        }

        let vectors = match self.flavor {
            HttpFlavor::OpenAi => {
                let result: OpenAiResponse = response
                    .json()
                    .await
                    .map_err(|e| AppError::embedding(format!("Failed to parse response: {}", e)))?;
                let mut data = result.data;
                if data.iter().all(|d| d.index.is_some()) {
                    data.sort_by_key(|d| d.index);
                }
                data.into_iter().map(|d| d.embedding).collect()
            }
            HttpFlavor::HuggingFace => response
                .json::<Vec<Vec<f32>>>()
                .await
                .map_err(|e| AppError::embedding(format!("Failed to parse response: {}", e)))?,
        };

        Ok(vectors)
    }

    fn validate_batch(&self, offset: usize, expected: usize, vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.len() != expected {
            return Err(AppError::embedding(format!(
                "expected {} embeddings, received {}",
                expected,
                vectors.len()
            )));
        }
        for (i, vector) in vectors.iter().enumerate() {
            check_dimension(self.dimension, vector)?;
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(AppError::Embedding {
                    message: "embedding contains non-finite values".to_string(),
                    index: Some(offset + i),
                });
            }
        }
        Ok(())
    }
}

/// Network failures, throttling and 5xx responses are worth another attempt
fn is_transient(err: &AppError) -> bool {
    match err {
        AppError::HttpClient(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        AppError::Embedding { message, .. } => {
            message.starts_with("API error 5") || message.starts_with("API error 429")
        }
        _ => false,
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_many(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| AppError::embedding("Empty response"))
    }

    #[tracing::instrument(skip(self, texts), fields(model = %self.model, count = texts.len()))]
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        check_inputs(texts)?;

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for (batch_no, batch) in texts.chunks(self.batch_size).enumerate() {
            let start = Instant::now();
            let result = self.request_with_retry(batch).await.and_then(|vectors| {
                self.validate_batch(batch_no * self.batch_size, batch.len(), &vectors)?;
                Ok(vectors)
            });
            crate::metrics::record_embedding(
                start.elapsed().as_secs_f64(),
                &self.model,
                batch.len(),
                result.is_ok(),
            );
            all_embeddings.extend(result?);
        }

        Ok(all_embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    if config.dimension == 0 {
        return Err(AppError::Configuration {
            message: "embedding.dimension must be greater than zero".to_string(),
        });
    }

    match config.provider.to_ascii_lowercase().as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dimension))),
        "openai" => Ok(Arc::new(HttpEmbedder::new(HttpFlavor::OpenAi, config)?)),
        "huggingface" | "hf" => Ok(Arc::new(HttpEmbedder::new(HttpFlavor::HuggingFace, config)?)),
        other => Err(AppError::Configuration {
            message: format!("unknown embedding provider '{}'", other),
        }),
    }
}
