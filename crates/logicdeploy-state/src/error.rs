//! Error types for logicdeploy-state

use thiserror::Error;

/// Errors raised while connecting to or initialising the persistence backend
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by the collaborator traits in [`crate::storage_traits`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A release id is unknown to the versioning center.
    #[error("release not found: {release_id}")]
    ReleaseNotFound { release_id: String },

    /// A snapshot id is unknown to the versioning center.
    #[error("snapshot not found: {snapshot_id}")]
    SnapshotNotFound { snapshot_id: String },

    /// A version id is unknown to the versioning center.
    #[error("version not found: {version_id}")]
    VersionNotFound { version_id: String },

    /// A persisted pipeline record is missing.
    #[error("{kind} record not found: {id}")]
    RecordNotFound { kind: String, id: String },

    /// Invalid content digest string.
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Record body could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend-specific failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Errors raised by a [`crate::storage_traits::TargetRuntime`].
///
/// `Timeout` is distinct from `Communication`: a timed-out call may or may
/// not have taken effect on the controller, so callers must re-query
/// remote state before deciding an outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("target {target} did not answer within {timeout_ms}ms during {operation}")]
    Timeout {
        target: String,
        operation: String,
        timeout_ms: u64,
    },

    #[error("communication with target {target} failed: {detail}")]
    Communication { target: String, detail: String },

    #[error("target {target} rejected {operation}: {reason}")]
    Rejected {
        target: String,
        operation: String,
        reason: String,
    },

    #[error("unknown target runtime: {target}")]
    UnknownTarget { target: String },
}

impl RuntimeError {
    /// Target the error refers to.
    pub fn target(&self) -> &str {
        match self {
            Self::Timeout { target, .. }
            | Self::Communication { target, .. }
            | Self::Rejected { target, .. }
            | Self::UnknownTarget { target } => target,
        }
    }

    /// Whether the outcome of the failed call is unknown.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_error_exposes_target() {
        let err = RuntimeError::Rejected {
            target: "plc-7".into(),
            operation: "activate".into(),
            reason: "checksum mismatch".into(),
        };
        assert_eq!(err.target(), "plc-7");
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn storage_error_from_state_error() {
        let err: StorageError = StateError::Connection("refused".into()).into();
        assert!(matches!(err, StorageError::Backend(msg) if msg.contains("refused")));
    }
}
