// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error Handling
//!
//! Two layers of errors live here:
//!
//! - [`SessionError`] is what the session core returns. Expected states
//!   (expired, corrupt or hijacked sessions) are never errors; they are reset
//!   silently. Only collaborator failures (identifier minting, storage) are
//!   surfaced, because without them no identity can be established.
//! - [`UserError`] is the HTTP-facing error used by the demo server. It never
//!   exposes internal details: the client receives a generic message plus a
//!   reference code, the full (sanitized) cause goes to the log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use rand::Rng;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use thiserror::Error;

// =============================================================================
// SESSION CORE ERRORS
// =============================================================================

/// Errors returned by the session lifecycle and its collaborators.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session name must not be empty")]
    EmptyName,

    #[error("session has not been started")]
    NotStarted,

    #[error("failed to mint session identifier: {0}")]
    IdentifierUnavailable(String),

    #[error("session storage unavailable: {0}")]
    StorageUnavailable(String),
}

// =============================================================================
// ERROR REFERENCE CODE GENERATION
// =============================================================================

/// Generate a unique error reference code.
/// Format: ERR-YYYYMMDD-XXXXXX (e.g., ERR-20240115-A3F8K2)
pub fn generate_reference_code() -> String {
    let date = Utc::now().format("%Y%m%d");
    let mut rng = rand::thread_rng();
    let chars: Vec<char> = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789".chars().collect();
    let random: String = (0..6)
        .map(|_| chars[rng.gen_range(0..chars.len())])
        .collect();
    format!("ERR-{}-{}", date, random)
}

// =============================================================================
// USER-FACING ERROR TYPES
// =============================================================================

/// Error types for user-facing responses.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "error_type", rename_all = "snake_case")]
pub enum UserError {
    /// Service temporarily unavailable (503)
    ServiceUnavailable {
        message: String,
        reference: String,
        retry_after_secs: Option<u64>,
    },

    /// Invalid request from client (400)
    InvalidRequest {
        message: String,
        reference: String,
        field: Option<String>,
    },

    /// Internal server error (500)
    InternalError {
        message: String,
        reference: String,
    },

    /// Resource not found (404)
    NotFound {
        message: String,
        reference: String,
    },
}

impl UserError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            UserError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            UserError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            UserError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            UserError::NotFound { .. } => StatusCode::NOT_FOUND,
        }
    }

    /// Get the reference code for this error.
    pub fn reference(&self) -> &str {
        match self {
            UserError::ServiceUnavailable { reference, .. } => reference,
            UserError::InvalidRequest { reference, .. } => reference,
            UserError::InternalError { reference, .. } => reference,
            UserError::NotFound { reference, .. } => reference,
        }
    }

    /// Get the user-facing message.
    pub fn message(&self) -> &str {
        match self {
            UserError::ServiceUnavailable { message, .. } => message,
            UserError::InvalidRequest { message, .. } => message,
            UserError::InternalError { message, .. } => message,
            UserError::NotFound { message, .. } => message,
        }
    }

    /// Create a ServiceUnavailable error, logging full details internally.
    pub fn service_unavailable(internal_error: &str) -> Self {
        let reference = generate_reference_code();
        let sanitized = sanitize_error_details(internal_error);

        tracing::error!(
            reference = %reference,
            internal_error = %sanitized,
            "Service unavailable"
        );

        Self::ServiceUnavailable {
            message: "Service temporarily unavailable. Please try again later.".to_string(),
            reference,
            retry_after_secs: Some(30),
        }
    }

    /// Create an InvalidRequest error.
    pub fn invalid_request(user_message: &str, field: Option<&str>, internal_details: Option<&str>) -> Self {
        let reference = generate_reference_code();

        if let Some(details) = internal_details {
            let sanitized = sanitize_error_details(details);
            tracing::warn!(
                reference = %reference,
                internal_details = %sanitized,
                field = ?field,
                "Invalid request"
            );
        }

        Self::InvalidRequest {
            message: user_message.to_string(),
            reference,
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create an InternalError. The message never carries internal details.
    pub fn internal_error(internal_error: &str) -> Self {
        let reference = generate_reference_code();
        let sanitized = sanitize_error_details(internal_error);

        tracing::error!(
            reference = %reference,
            internal_error = %sanitized,
            "Internal server error"
        );

        Self::InternalError {
            message: format!("An internal error occurred. Reference: {}", reference),
            reference,
        }
    }

    /// Create a NotFound error.
    pub fn not_found(resource: &str) -> Self {
        let reference = generate_reference_code();

        tracing::info!(
            reference = %reference,
            resource = %resource,
            "Resource not found"
        );

        Self::NotFound {
            message: format!("The requested {} was not found.", resource),
            reference,
        }
    }
}

/// User-facing error response structure (JSON format).
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: UserError,
    pub status: u16,
}

impl IntoResponse for UserError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let response = ErrorResponse {
            status: status.as_u16(),
            error: self,
        };

        let body = serde_json::to_string(&response).unwrap_or_else(|_| {
            r#"{"error":{"error_type":"internal_error","message":"An unexpected error occurred","reference":"ERR-FALLBACK"},"status":500}"#.to_string()
        });

        (status, [("content-type", "application/json")], body).into_response()
    }
}

impl From<SessionError> for UserError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::EmptyName => UserError::invalid_request(
                "Invalid session name.",
                Some("name"),
                Some(&error.to_string()),
            ),
            SessionError::NotStarted => UserError::internal_error(&error.to_string()),
            SessionError::IdentifierUnavailable(_) | SessionError::StorageUnavailable(_) => {
                UserError::service_unavailable(&error.to_string())
            }
        }
    }
}

// =============================================================================
// ERROR SANITIZATION
// =============================================================================

/// Patterns for sanitizing sensitive information from error messages.
/// Compiled once on first use.
static SANITIZE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        // File paths (Windows and Unix)
        (Regex::new(r"[A-Za-z]:\\[^\s]+").expect("Windows path regex"), "[PATH_REDACTED]"),
        (Regex::new(r"/(?:home|usr|var|etc|opt|tmp|root)/[^\s]+").expect("Unix path regex"), "[PATH_REDACTED]"),

        // IP addresses (IPv4 and IPv6)
        (Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").expect("IPv4 regex"), "[IP_REDACTED]"),
        (Regex::new(r"\b(?:[0-9a-fA-F]{1,4}:){7}[0-9a-fA-F]{1,4}\b").expect("IPv6 full regex"), "[IP_REDACTED]"),

        // Session cookies and identifiers
        (Regex::new(r"(?i)[A-Za-z0-9_-]+_Session=[^\s;]+").expect("Session cookie regex"), "[SESSION_COOKIE_REDACTED]"),
        (Regex::new(r"\b[0-9a-fA-F]{32,}\b").expect("Hex identifier regex"), "[SESSION_ID_REDACTED]"),

        // Stack traces (Rust-specific patterns)
        (Regex::new(r"at [^\s]+\.rs:\d+:\d+").expect("Rust location regex"), "[LOCATION_REDACTED]"),
        (Regex::new(r"thread '[^']+' panicked at").expect("Panic regex"), "[PANIC_REDACTED]"),
    ]
});

/// Sanitize error details to remove sensitive information.
///
/// Removes file paths, IP addresses, session cookies and identifiers, and
/// Rust source locations.
pub fn sanitize_error_details(error: &str) -> String {
    let mut result = error.to_string();

    for (pattern, replacement) in SANITIZE_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }

    result
}

/// Result type that uses UserError for the error variant.
pub type ApiResult<T> = Result<T, UserError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_reference_code() {
        let code = generate_reference_code();
        assert!(code.starts_with("ERR-"));
        assert_eq!(code.len(), 19); // ERR-YYYYMMDD-XXXXXX = 4+8+1+6
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            UserError::service_unavailable("test").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            UserError::invalid_request("test", None, None).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            UserError::internal_error("test").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            UserError::not_found("session key").status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_session_error_mapping() {
        let err: UserError = SessionError::EmptyName.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err: UserError = SessionError::IdentifierUnavailable("os rng".into()).into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err: UserError = SessionError::StorageUnavailable("backend down".into()).into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_sanitize_ip_addresses() {
        let sanitized = sanitize_error_details("Fingerprint mismatch from 192.168.1.100");
        assert!(!sanitized.contains("192.168.1.100"));
        assert!(sanitized.contains("[IP_REDACTED]"));
    }

    #[test]
    fn test_sanitize_session_identifiers() {
        let id = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
        let sanitized = sanitize_error_details(&format!("storage failed for {}", id));
        assert!(!sanitized.contains(id));
        assert!(sanitized.contains("[SESSION_ID_REDACTED]"));

        let sanitized = sanitize_error_details("bad header app_Session=abc123; Path=/");
        assert!(!sanitized.contains("abc123"));
        assert!(sanitized.contains("[SESSION_COOKIE_REDACTED]"));
    }

    #[test]
    fn test_internal_error_never_exposes_details() {
        let user_error = UserError::internal_error("lock failed at /home/user/app from 10.0.0.5");

        let message = user_error.message();
        assert!(!message.contains("/home/user"));
        assert!(!message.contains("10.0.0.5"));
        assert!(message.contains("Reference:"));
    }

    #[test]
    fn test_user_error_serialization() {
        let error = UserError::invalid_request("Bad input", Some("key"), None);
        let json = serde_json::to_string(&error).unwrap();

        assert!(json.contains("invalid_request"));
        assert!(json.contains("Bad input"));
        assert!(json.contains("reference"));
    }
}
