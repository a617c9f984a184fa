//! Input guards for user-supplied queries and filenames

use crate::errors::{AppError, Result};
use regex_lite::Regex;
use std::sync::OnceLock;

/// Shortest accepted query, in characters after sanitizing
pub const MIN_QUERY_LENGTH: usize = 3;

/// Longest accepted query, in characters after sanitizing
pub const MAX_QUERY_LENGTH: usize = 1000;

const BLOCKED_PATTERNS: &[&str] = &[
    // SQL injection
    r"(?i)(drop\s+table|delete\s+from|insert\s+into)",
    // Code injection
    r"(?i)\b(exec|execute|script|javascript)\b",
    // Prompt injection
    r"(?i)(ignore\s+previous|forget\s+instructions)",
    // Role manipulation
    r"(?i)(you\s+are\s+now|pretend\s+to\s+be)",
    // XSS
    r"(?i)(<script|<iframe|onerror=|onclick=)",
];

fn blocked_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        BLOCKED_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("blocked pattern is valid"))
            .collect()
    })
}

/// Strip NULs and control characters and collapse whitespace runs
pub fn sanitize_input(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Sanitize a query and check its length and content
pub fn validate_query(query: &str) -> Result<String> {
    let sanitized = sanitize_input(query);
    let length = sanitized.chars().count();

    if length < MIN_QUERY_LENGTH {
        return Err(AppError::validation(
            "query",
            format!("Query too short (min {} chars)", MIN_QUERY_LENGTH),
        ));
    }

    if length > MAX_QUERY_LENGTH {
        return Err(AppError::validation(
            "query",
            format!("Query too long (max {} chars)", MAX_QUERY_LENGTH),
        ));
    }

    if blocked_patterns().iter().any(|p| p.is_match(&sanitized)) {
        let preview: String = sanitized.chars().take(100).collect();
        tracing::warn!(query = %preview, "Blocked query");
        return Err(AppError::validation("query", "Query contains prohibited content"));
    }

    Ok(sanitized)
}

/// Sanitize an upload filename, rejecting path components and non-PDF names
pub fn validate_filename(filename: &str) -> Result<String> {
    let sanitized = sanitize_input(filename);

    if sanitized.is_empty() {
        return Err(AppError::validation("file", "Missing filename"));
    }

    if sanitized.contains("..") || sanitized.contains('/') || sanitized.contains('\\') {
        return Err(AppError::validation("file", "Invalid filename characters"));
    }

    if !sanitized.to_lowercase().ends_with(".pdf") {
        return Err(AppError::validation("file", "Only PDF files allowed"));
    }

    Ok(sanitized)
}
