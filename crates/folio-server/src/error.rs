//! HTTP error mapping.
//!
//! Every failure leaves as JSON `{"error": "..."}` with a status the client
//! can branch on. A version conflict also carries the current page so the
//! client can re-render and retry.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use folio_kernel::PageError;
use folio_types::Page;

/// Errors returned by HTTP handlers.
#[derive(Debug)]
pub enum ApiError {
    Page(PageError),
    /// The write lost a version race; `current` is what won.
    Conflict { current: Box<Page> },
    /// The request could not be decoded.
    BadRequest(String),
}

impl ApiError {
    pub fn conflict(current: Page) -> Self {
        ApiError::Conflict {
            current: Box::new(current),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Page(e) => match e {
                PageError::NotFound => StatusCode::NOT_FOUND,
                PageError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                PageError::Forbidden => StatusCode::FORBIDDEN,
                PageError::Conflict => StatusCode::CONFLICT,
                PageError::RealtimeUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                PageError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<PageError> for ApiError {
    fn from(e: PageError) -> Self {
        ApiError::Page(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Conflict { current } => json!({
                "error": PageError::Conflict.to_string(),
                "current": current,
            }),
            ApiError::Page(PageError::Storage(detail)) => {
                tracing::error!(error = %detail, "storage failure");
                json!({ "error": "internal error" })
            }
            ApiError::Page(e) => json!({ "error": e.to_string() }),
            ApiError::BadRequest(message) => json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statuses_are_distinct() {
        let cases = [
            (PageError::NotFound, StatusCode::NOT_FOUND),
            (PageError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (PageError::Forbidden, StatusCode::FORBIDDEN),
            (PageError::Conflict, StatusCode::CONFLICT),
            (PageError::RealtimeUnavailable, StatusCode::SERVICE_UNAVAILABLE),
            (PageError::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).into_response().status(), status);
        }
    }
}
