//! Error taxonomy shared by the upload orchestrator and the HTTP layer.

use std::fmt;
use thiserror::Error;

/// Which side of the object/record pair survived a failed two-store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InconsistencyKind {
    /// Object present in the bucket with no metadata row.
    OrphanedObject,
    /// Metadata row present while its object is gone.
    DanglingRecord,
}

impl InconsistencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InconsistencyKind::OrphanedObject => "orphaned_object",
            InconsistencyKind::DanglingRecord => "dangling_record",
        }
    }
}

impl fmt::Display for InconsistencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed input; no side effects were attempted.
    #[error("{0}")]
    Client(String),

    /// Well-formed identifier with no matching record.
    #[error("Not Found")]
    NotFound,

    /// An object-store or metadata-store call failed or timed out.
    #[error("dependency failure: {0:#}")]
    Dependency(anyhow::Error),

    /// A cleanup step failed and the object/record invariant no longer holds.
    #[error("{kind} left behind for object {object_key}: {cause:#}")]
    Inconsistency {
        kind: InconsistencyKind,
        object_key: String,
        cause: anyhow::Error,
    },
}

impl ServiceError {
    pub fn client(message: impl Into<String>) -> Self {
        ServiceError::Client(message.into())
    }

    /// True when external remediation is required.
    pub fn is_inconsistency(&self) -> bool {
        matches!(self, ServiceError::Inconsistency { .. })
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_inconsistency_display_names_kind_and_key() {
        let err = ServiceError::Inconsistency {
            kind: InconsistencyKind::OrphanedObject,
            object_key: "abc/a.txt".to_string(),
            cause: anyhow!("connection reset"),
        };

        let message = err.to_string();
        assert!(message.contains("orphaned_object"));
        assert!(message.contains("abc/a.txt"));
        assert!(message.contains("connection reset"));
        assert!(err.is_inconsistency());
    }

    #[test]
    fn test_dependency_display_includes_context_chain() {
        let err = ServiceError::Dependency(anyhow!("pool timed out").context("insert image"));
        let message = err.to_string();
        assert!(message.contains("insert image"));
        assert!(message.contains("pool timed out"));
        assert!(!err.is_inconsistency());
    }
}
