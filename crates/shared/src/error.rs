//! Shared error types including RFC7807 Problem Details.

use serde::{Deserialize, Serialize};

/// Failure to read or write a wire frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has an empty `type` field")]
    MissingType,
}

/// RFC7807 Problem Details (application/problem+json)
///
/// The relay answers every `/api/*` failure with this body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type.
    #[serde(rename = "type")]
    pub type_url: String,
    /// A short, human-readable summary of the problem type.
    pub title: String,
    /// HTTP status code.
    pub status: u16,
    /// Human-readable explanation specific to this occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProblemDetails {
    fn new(slug: &str, title: &str, status: u16, detail: String) -> Self {
        Self {
            type_url: format!("https://tally.dev/problems/{}", slug),
            title: title.to_string(),
            status,
            detail: Some(detail),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new("bad-request", "Bad Request", 400, detail.into())
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new("unauthorized", "Unauthorized", 401, detail.into())
    }

    pub fn internal_error(detail: impl Into<String>) -> Self {
        Self::new("internal-error", "Internal Server Error", 500, detail.into())
    }
}

/// Attempt to parse an RFC7807 JSON body into a user-facing message.
/// Prefers `detail`, falls back to `title`.
pub fn try_problem_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ProblemDetails>(body).ok()?;
    if let Some(detail) = parsed.detail {
        if !detail.trim().is_empty() {
            return Some(detail);
        }
    }
    if !parsed.title.trim().is_empty() {
        return Some(parsed.title);
    }
    None
}
