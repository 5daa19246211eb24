//! Error taxonomy for the belief-revision core.
//!
//! Every error that can cross the tool boundary carries a stable code so
//! callers can branch on it without string matching. Store-level failures
//! keep their own enum and fold into [`CoreError`] at the seam.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

// ============================================================================
// ERROR CODES
// ============================================================================

/// Stable, taxonomized error codes surfaced at the tool boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Validation,
    NotFound,
    Conflict,
    ConsentRequired,
    SafeguardViolation,
    FramingViolation,
    ProjectViolation,
    StoreError,
    UpstreamExhausted,
    HandlerError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::ConsentRequired => "CONSENT_REQUIRED",
            ErrorCode::SafeguardViolation => "SAFEGUARD_VIOLATION",
            ErrorCode::FramingViolation => "FRAMING_VIOLATION",
            ErrorCode::ProjectViolation => "PROJECT_VIOLATION",
            ErrorCode::StoreError => "STORE_ERROR",
            ErrorCode::UpstreamExhausted => "UPSTREAM_EXHAUSTED",
            ErrorCode::HandlerError => "HANDLER_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// STORE ERRORS
// ============================================================================

/// Errors raised by a store backend.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Referenced row does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// Uniqueness constraint violated
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    /// Row belongs to a different project than the caller's scope
    #[error("project violation: {0}")]
    ProjectViolation(String),
    /// Transient or unexpected backend failure
    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::NotFound(_) => ErrorCode::NotFound,
            StoreError::UniqueViolation(_) => ErrorCode::Conflict,
            StoreError::ProjectViolation(_) => ErrorCode::ProjectViolation,
            StoreError::Backend(_) => ErrorCode::StoreError,
        }
    }
}

// ============================================================================
// CORE ERRORS
// ============================================================================

/// The core error type. One variant per taxonomy entry, plus dedicated
/// variants for conditions callers are expected to branch on.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Bad parameter, unknown enum value, empty required field
    #[error("{message}")]
    Validation {
        field: Option<String>,
        message: String,
    },

    /// Referenced entity absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violated or transition not allowed
    #[error("conflict: {0}")]
    Conflict(String),

    /// Undo requested past the 30-day retention window
    #[error("retention expired: undo window closed at {deadline}")]
    RetentionExpired { deadline: DateTime<Utc> },

    /// Constitutive edge mutation without an approved bilateral proposal
    #[error("bilateral consent required for constitutive edge {edge_id}")]
    ConsentRequired { edge_id: Uuid, hint: String },

    /// Proposal attempts to modify safeguards or bypass consent rules
    #[error("safeguard violation: {0}")]
    Safeguard(String),

    /// Non-neutral proposal reasoning
    #[error("framing violation: {}", violations.join(", "))]
    Framing { violations: Vec<String> },

    /// Write or read targeting a different project
    #[error("project violation: {0}")]
    ProjectViolation(String),

    /// Store failure bubbling up after best-effort handling
    #[error(transparent)]
    Store(#[from] StoreError),

    /// LLM call failed all retries
    #[error("upstream exhausted: {0}")]
    UpstreamExhausted(String),

    /// Unexpected condition; details logged, not leaked
    #[error("internal error: {0}")]
    Handler(String),
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::Validation { .. } => ErrorCode::Validation,
            CoreError::NotFound(_) => ErrorCode::NotFound,
            CoreError::Conflict(_) => ErrorCode::Conflict,
            CoreError::RetentionExpired { .. } => ErrorCode::Conflict,
            CoreError::ConsentRequired { .. } => ErrorCode::ConsentRequired,
            CoreError::Safeguard(_) => ErrorCode::SafeguardViolation,
            CoreError::Framing { .. } => ErrorCode::FramingViolation,
            CoreError::ProjectViolation(_) => ErrorCode::ProjectViolation,
            CoreError::Store(e) => e.code(),
            CoreError::UpstreamExhausted(_) => ErrorCode::UpstreamExhausted,
            CoreError::Handler(_) => ErrorCode::HandlerError,
        }
    }

    /// Shorthand for a validation error naming the offending field.
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field: Some(field.to_string()),
            message: message.into(),
        }
    }

    /// Structured shape surfaced to tool callers.
    pub fn to_detail(&self) -> ErrorDetail {
        let field = match self {
            CoreError::Validation { field, .. } => field.clone(),
            _ => None,
        };
        let details = match self {
            CoreError::ConsentRequired { hint, .. } => Some(hint.clone()),
            CoreError::Framing { violations } => Some(violations.join("; ")),
            CoreError::RetentionExpired { deadline } => Some(deadline.to_rfc3339()),
            _ => None,
        };
        ErrorDetail {
            code: self.code(),
            message: self.to_string(),
            field,
            details,
        }
    }
}

/// The `error` object embedded in structured tool outcomes.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Core result type
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ErrorCode::ConsentRequired.as_str(), "CONSENT_REQUIRED");
        assert_eq!(ErrorCode::SafeguardViolation.as_str(), "SAFEGUARD_VIOLATION");
        assert_eq!(ErrorCode::UpstreamExhausted.as_str(), "UPSTREAM_EXHAUSTED");
    }

    #[test]
    fn test_retention_expired_maps_to_conflict() {
        let err = CoreError::RetentionExpired {
            deadline: Utc::now(),
        };
        assert_eq!(err.code(), ErrorCode::Conflict);
        assert!(err.to_detail().details.is_some());
    }

    #[test]
    fn test_store_error_codes() {
        assert_eq!(
            CoreError::from(StoreError::ProjectViolation("edges".into())).code(),
            ErrorCode::ProjectViolation
        );
        assert_eq!(
            CoreError::from(StoreError::UniqueViolation("edges".into())).code(),
            ErrorCode::Conflict
        );
        assert_eq!(
            CoreError::from(StoreError::Backend("connection reset".into())).code(),
            ErrorCode::StoreError
        );
    }

    #[test]
    fn test_validation_detail_carries_field() {
        let err = CoreError::validation("scope", "must be 'recent' or 'full'");
        let detail = err.to_detail();
        assert_eq!(detail.field.as_deref(), Some("scope"));
        assert_eq!(detail.code, ErrorCode::Validation);
    }
}
