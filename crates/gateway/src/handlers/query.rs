//! Query handler

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

use crate::AppState;
use ekip_common::{
    errors::{AppError, Result},
    guard, metrics, Role, Source,
};
use ekip_search::apply_threshold;

/// Query request
#[derive(Debug, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1))]
    pub query: String,

    #[validate(length(min = 1, max = 64))]
    pub role: String,
}

/// Query response
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceItem>,
}

#[derive(Debug, Serialize)]
pub struct SourceItem {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub similarity: f32,
}

impl From<Source> for SourceItem {
    fn from(source: Source) -> Self {
        Self {
            filename: source.filename,
            page: source.page,
            similarity: (source.similarity * 1000.0).round() / 1000.0,
        }
    }
}

/// Answer a question from the documents the caller's role may see
pub async fn query(
    State(state): State<AppState>,
    payload: std::result::Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>> {
    let start = Instant::now();

    let Json(request) = payload.map_err(|e| AppError::Validation {
        message: e.body_text(),
        field: None,
    })?;

    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let question = guard::validate_query(&request.query)?;
    let role = Role::new(request.role.trim());

    let mut results = state
        .retriever
        .retrieve(&question, &role, state.config.retrieval.top_k)
        .await?;

    if let Some(base) = state.config.retrieval.min_similarity {
        results = if state.config.retrieval.adaptive_threshold {
            apply_threshold(results, &question, base)
        } else {
            results.into_iter().filter(|r| r.similarity >= base).collect()
        };
    }

    let answer = state
        .composer
        .compose(&question, &results, state.generator.as_ref())
        .await?;

    metrics::record_query(start.elapsed().as_secs_f64(), role.as_str(), results.len());
    tracing::info!(
        role = %role,
        passages = results.len(),
        sources = answer.sources.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Query answered"
    );

    Ok(Json(QueryResponse {
        answer: answer.text,
        sources: answer.sources.into_iter().map(SourceItem::from).collect(),
    }))
}
