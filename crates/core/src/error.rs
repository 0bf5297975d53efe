//! Domain error model.

use serde::Serialize;
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Domain-level error.
///
/// Every layer (stores, services, HTTP) maps its failures into one of these
/// kinds. Authorization and validation failures are raised before any
/// mutation is attempted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// No authenticated session.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Session is valid but lacks the required membership/role.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Referenced entity absent or outside the caller's tenant scope.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input, reported per field.
    #[error("validation failed: {}", summarize(.0))]
    Validation(Vec<FieldError>),

    /// State transition not permitted (e.g. acting on a non-pending request).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unexpected datastore or logic failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

fn summarize(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Collects field errors so a request reports every bad field at once.
#[derive(Debug, Default)]
pub struct ValidationReport {
    errors: Vec<FieldError>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `message` against `field` unless `ok` holds.
    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.errors.push(FieldError::new(field, message));
        }
    }

    pub fn push(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    /// Unwrap a parse result, recording the failure under `field`.
    pub fn take<T>(&mut self, field: &str, result: Result<T, DomainError>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(DomainError::Validation(mut errs)) => {
                self.errors.append(&mut errs);
                None
            }
            Err(e) => {
                self.errors.push(FieldError::new(field, e.to_string()));
                None
            }
        }
    }

    pub fn finish(self) -> DomainResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(DomainError::Validation(self.errors))
        }
    }
}
