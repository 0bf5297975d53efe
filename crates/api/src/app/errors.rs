use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crewbook_core::DomainError;

pub type ApiResult = Result<Response, ApiError>;

/// Anything a handler can fail with.
#[derive(Debug)]
pub enum ApiError {
    Domain(DomainError),
    /// Malformed request that never reached the domain (bad JSON, bad path id).
    BadRequest { code: &'static str, message: String },
}

impl ApiError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        Self::Domain(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request("invalid_json", rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request("invalid_query", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Domain(e) => domain_error_to_response(e),
            ApiError::BadRequest { code, message } => json_error(StatusCode::BAD_REQUEST, code, message, None),
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> Response {
    match err {
        DomainError::Unauthenticated => json_error(
            StatusCode::UNAUTHORIZED,
            "unauthenticated",
            "missing or invalid bearer token",
            None,
        ),
        DomainError::Unauthorized(msg) => json_error(StatusCode::FORBIDDEN, "unauthorized", msg, None),
        DomainError::NotFound(what) => json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"), None),
        DomainError::Validation(fields) => {
            let message = DomainError::Validation(fields.clone()).to_string();
            json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                message,
                Some(json!(fields)),
            )
        }
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg, None),
        DomainError::Internal(msg) => {
            tracing::error!(error = %msg, "internal error");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal server error",
                None,
            )
        }
    }
}

/// `{ "error": message, "code": code, "details"?: ... }`
pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> Response {
    let mut body = json!({
        "error": message.into(),
        "code": code,
    });
    if let Some(details) = details {
        body["details"] = details;
    }
    (status, axum::Json(body)).into_response()
}
