//! JSON response envelopes and status helpers
//!
//! Every JSON body leaving the framework uses one of two envelopes:
//!
//! - Success: `{ "success": true, "data": <value> }`
//! - Error:   `{ "success": false, "error": { "message": <string>, "requestError": [...] } }`
//!
//! The `requestError` array is only present for validation failures.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Standard success envelope (200 OK)
///
/// # Example
///
/// ```rust,ignore
/// async fn get_user() -> Success<User> {
///     Success::new(User { id: 1, name: "Alice".to_string() })
/// }
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct Success<T> {
    success: bool,
    data: T,
}

impl<T> Success<T> {
    /// Wrap a value in the success envelope
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for Success<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// One field-level error inside the `requestError` array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestError {
    /// Dot-separated field path (JSON names; `name[i]` / `name[key]` for
    /// sequence and map elements; sentinels `"custom"`, `"body"`, `"-"`)
    pub field: String,
    /// Human-readable error message
    pub message: String,
}

impl RequestError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error detail carried inside the error envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Error message
    pub message: String,

    /// Field-level validation errors, when applicable
    #[serde(rename = "requestError", skip_serializing_if = "Option::is_none")]
    pub request_error: Option<Vec<RequestError>>,
}

/// Error envelope body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorDetail,
}

impl ErrorEnvelope {
    /// Create an error envelope with a message only
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: ErrorDetail {
                message: message.into(),
                request_error: None,
            },
        }
    }

    /// Create an error envelope carrying field-level errors
    pub fn with_request_errors(message: impl Into<String>, errors: Vec<RequestError>) -> Self {
        Self {
            success: false,
            error: ErrorDetail {
                message: message.into(),
                request_error: Some(errors),
            },
        }
    }
}

/// Build a response with the given status and error envelope body
fn status_response(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorEnvelope::new(message))).into_response()
}

/// 400 Bad Request with the error envelope
pub fn http_400(message: &str) -> Response {
    status_response(StatusCode::BAD_REQUEST, message)
}

/// 401 Unauthorized with the error envelope
pub fn http_401(message: &str) -> Response {
    status_response(StatusCode::UNAUTHORIZED, message)
}

/// 403 Forbidden with the error envelope
pub fn http_403(message: &str) -> Response {
    status_response(StatusCode::FORBIDDEN, message)
}

/// 404 Not Found with the error envelope
pub fn http_404(message: &str) -> Response {
    status_response(StatusCode::NOT_FOUND, message)
}

/// 429 Too Many Requests with the error envelope
pub fn http_429(message: &str) -> Response {
    status_response(StatusCode::TOO_MANY_REQUESTS, message)
}

/// 500 Internal Server Error with the error envelope
pub fn http_500(message: &str) -> Response {
    status_response(StatusCode::INTERNAL_SERVER_ERROR, message)
}
