//! Error taxonomy for the translation memory core
//!
//! Errors are classified by outcome, not by origin: every backend-specific
//! failure is normalised into one of these categories before it crosses a
//! repository boundary.

use thiserror::Error;

/// Result type alias for translation memory operations
pub type Result<T> = std::result::Result<T, TmError>;

/// Errors that can occur in the translation memory core
#[derive(Debug, Error)]
pub enum TmError {
    /// A referenced entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation would violate a uniqueness or structural invariant
    #[error("conflict: {0}")]
    Conflict(String),

    /// The payload failed validation before reaching the backend
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The injected viewer identity lacks rights for the operation
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The backing store cannot be reached
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Index artifacts are missing, mismatched, or corrupt
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// The operation has no realisation under the active backend mode
    #[error("feature unavailable in this mode: {0}")]
    FeatureUnavailable(String),

    /// Embedding generation error
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected internal error; never silently swallowed
    #[error("internal error: {0}")]
    Internal(String),
}

impl TmError {
    /// Convenience constructor for a missing entity of a given kind
    #[must_use]
    pub fn not_found(kind: &str, id: i64) -> Self {
        Self::NotFound(format!("{kind} {id}"))
    }

    /// Whether a factory-level failover to the degraded mode may be attempted
    #[must_use]
    pub const fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }
}

impl From<String> for TmError {
    fn from(s: String) -> Self {
        Self::Internal(s)
    }
}

impl From<&str> for TmError {
    fn from(s: &str) -> Self {
        Self::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_helper() {
        let err = TmError::not_found("translation memory", 42);
        assert_eq!(err.to_string(), "not found: translation memory 42");
    }

    #[test]
    fn test_backend_unavailable_detection() {
        assert!(TmError::BackendUnavailable("down".into()).is_backend_unavailable());
        assert!(!TmError::NotFound("x".into()).is_backend_unavailable());
    }
}
