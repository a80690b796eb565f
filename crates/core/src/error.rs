use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/// Behavioural error classes shared across the workspace.
///
/// The mapping to HTTP statuses and retry behaviour is fixed here so every
/// crate reports failures the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing, invalid, expired or revoked credentials.
    AuthenticationFailed,
    /// Policy rejected the request; always audited by the caller.
    AuthorizationDenied,
    /// Input shape or value out of range.
    ValidationFailed,
    /// Unknown identifier.
    NotFound,
    /// Duplicate registration or a state transition outside the allowed DAG.
    Conflict,
    /// Timeouts and network errors against external collaborators.
    Transient,
    /// Corrupt audit chain, missing signing secret - abort, never heal silently.
    Fatal,
}

impl ErrorKind {
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::AuthenticationFailed => 401,
            ErrorKind::AuthorizationDenied => 403,
            ErrorKind::ValidationFailed => 422,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Transient => 503,
            ErrorKind::Fatal => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

/// Main error type for the workspace.
#[derive(Debug, ThisError, Clone)]
#[error("{kind:?}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthenticationFailed, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthorizationDenied, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailed, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// JSON body for API responses. Authentication failures collapse to a
    /// generic detail string so token material never leaks.
    pub fn to_api_response(&self) -> serde_json::Value {
        let detail = match self.kind {
            ErrorKind::AuthenticationFailed => "Not authenticated".to_string(),
            ErrorKind::AuthorizationDenied => self.message.clone(),
            _ => self.message.clone(),
        };
        serde_json::json!({ "detail": detail })
    }
}
