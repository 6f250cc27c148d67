//! # Store Errors
//!
//! Failures reported by a [`ClusterBackend`](super::ClusterBackend). These are
//! raw store outcomes; the driver wraps them with operation context before
//! they reach a caller.

use thiserror::Error;

/// Result type for backend operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Backend error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Bucket not found: {bucket}")]
    BucketNotFound { bucket: String },

    #[error("Scope not found: {scope}")]
    ScopeNotFound { scope: String },

    #[error("Scope already exists: {scope}")]
    ScopeExists { scope: String },

    #[error("Collection not found: {keyspace}")]
    CollectionNotFound { keyspace: String },

    #[error("Collection already exists: {keyspace}")]
    CollectionExists { keyspace: String },

    #[error("Index not found: {index}")]
    IndexNotFound { index: String },

    #[error("Index already exists: {index}")]
    IndexExists { index: String },

    /// The keyspace has no index able to serve the query
    #[error("No index available on keyspace {keyspace}")]
    NoIndexAvailable { keyspace: String },

    #[error("Document not found: {key}")]
    DocumentNotFound { key: String },

    #[error("Malformed statement: {reason}")]
    MalformedStatement { reason: String },

    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("Transport error: {reason}")]
    Transport { reason: String },

    #[error("Unexpected response: {reason}")]
    Protocol { reason: String },

    /// The backend has no support for this operation
    #[error("Operation '{operation}' is not supported by this backend")]
    Unsupported { operation: &'static str },
}

impl StoreError {
    /// True for "the thing you tried to create is already there".
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Self::ScopeExists { .. } | Self::CollectionExists { .. } | Self::IndexExists { .. }
        )
    }

    /// Errors a freshly created namespace reports until its metadata has
    /// reached every service in the cluster.
    pub fn is_propagating(&self) -> bool {
        matches!(
            self,
            Self::ScopeNotFound { .. } | Self::CollectionNotFound { .. }
        )
    }
}
