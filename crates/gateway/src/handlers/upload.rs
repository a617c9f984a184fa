//! Document upload handler

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Instant;

use crate::AppState;
use ekip_common::{
    errors::{AppError, Result},
    guard, AccessTag, Role,
};
use ekip_ingestion::{pdf::PDF_MAGIC, IngestRequest};

/// Upload response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub chunks_created: usize,
    pub text_length: usize,
    pub doc_type: String,
}

/// Fields collected from the multipart body
#[derive(Default)]
struct UploadForm {
    filename: Option<String>,
    bytes: Vec<u8>,
    role: Option<String>,
    doc_type: Option<String>,
}

fn multipart_error(e: MultipartError, received: usize, limit: usize) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge {
            size: received,
            limit,
        }
    } else {
        AppError::Validation {
            message: e.body_text(),
            field: None,
        }
    }
}

async fn read_form(multipart: &mut Multipart, limit: usize) -> Result<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, 0, limit))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                form.filename = field.file_name().map(str::to_string);
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| multipart_error(e, form.bytes.len(), limit))?
                {
                    form.bytes.extend_from_slice(&chunk);
                    if form.bytes.len() > limit {
                        return Err(AppError::PayloadTooLarge {
                            size: form.bytes.len(),
                            limit,
                        });
                    }
                }
            }
            "role" => {
                form.role = Some(field.text().await.map_err(|e| multipart_error(e, 0, limit))?)
            }
            "doc_type" => {
                form.doc_type = Some(field.text().await.map_err(|e| multipart_error(e, 0, limit))?)
            }
            other => tracing::debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    Ok(form)
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::validation(field, format!("Missing required field '{}'", field)))
}

/// Ingest an uploaded PDF under the given access tag
pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<UploadResponse>> {
    let start = Instant::now();
    let limit = state.config.server.max_upload_bytes;

    let form = read_form(&mut multipart, limit).await?;
    let filename = guard::validate_filename(&required(form.filename, "file")?)?;
    let role = Role::new(required(form.role, "role")?);
    let doc_type = AccessTag::new(required(form.doc_type, "doc_type")?);

    if form.bytes.is_empty() {
        return Err(AppError::EmptyInput {
            what: "file".to_string(),
        });
    }
    if !form.bytes.starts_with(PDF_MAGIC) {
        return Err(AppError::InvalidFormat {
            message: "File is not a PDF".to_string(),
        });
    }

    let fingerprint = hex::encode(Sha256::digest(&form.bytes));
    tracing::info!(
        filename = %filename,
        size = form.bytes.len(),
        sha256 = %fingerprint,
        "Received upload"
    );

    let extractor = state.extractor.clone();
    let bytes = form.bytes;
    let extracted = tokio::task::spawn_blocking(move || extractor.extract(&bytes))
        .await
        .map_err(|e| AppError::Internal {
            message: format!("PDF extraction task failed: {}", e),
        })??;

    let extracted_chars = extracted.character_count();
    if extracted_chars < state.config.server.min_document_chars {
        return Err(AppError::validation(
            "file",
            format!(
                "Extracted text is too short ({} characters, minimum {})",
                extracted_chars, state.config.server.min_document_chars
            ),
        ));
    }

    let (text, pages) = extracted.into_text();
    let outcome = state
        .pipeline
        .ingest(IngestRequest {
            text,
            filename: filename.clone(),
            doc_type,
            uploaded_by: role,
            pages,
        })
        .await?;

    tracing::info!(
        document_id = %outcome.document.id,
        sha256 = %fingerprint,
        chunks = outcome.chunks_created,
        duration_ms = start.elapsed().as_millis() as u64,
        "Upload indexed"
    );

    Ok(Json(UploadResponse {
        filename,
        chunks_created: outcome.chunks_created,
        text_length: outcome.character_count,
        doc_type: outcome.document.doc_type.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_field() {
        assert_eq!(required(Some(" HR ".into()), "role").unwrap(), "HR");
        assert!(matches!(
            required(Some("   ".into()), "role"),
            Err(AppError::Validation { .. })
        ));
        assert!(required(None, "doc_type").is_err());
    }
}
