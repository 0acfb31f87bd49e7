//! HTTP error responses.

use axum::extract::rejection::JsonRejection;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tally_shared::ProblemDetails;

/// An `application/problem+json` response.
#[derive(Debug)]
pub struct Problem(pub ProblemDetails);

impl Problem {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self(ProblemDetails::bad_request(detail))
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self(ProblemDetails::unauthorized(detail))
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self(ProblemDetails::internal_error(detail))
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(header::CONTENT_TYPE, "application/problem+json")],
            Json(self.0),
        )
            .into_response()
    }
}

impl From<JsonRejection> for Problem {
    fn from(rejection: JsonRejection) -> Self {
        Problem::bad_request(rejection.body_text())
    }
}
