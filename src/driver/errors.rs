//! # Driver Errors
//!
//! Every failure a caller can see. Store failures are wrapped with the
//! operation name and the target namespace so a failed migration step can be
//! diagnosed from the message alone.

use thiserror::Error;

use crate::cluster::StoreError;

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

/// Driver error types
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    /// Required configuration is missing or invalid. Never retried.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Transport or authentication failure while connecting or closing
    #[error("Connection error during {operation}: {source}")]
    Connection {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    /// Namespace, collection or index creation failed. The tracking
    /// namespace is in an unknown state and the migration run must halt.
    #[error("Provisioning failed during {operation} on {target}: {source}")]
    Provisioning {
        operation: &'static str,
        target: String,
        #[source]
        source: StoreError,
    },

    /// Malformed index definition, naming conflict or missing index
    #[error("Index error during {operation} on {target}: {source}")]
    Index {
        operation: &'static str,
        target: String,
        #[source]
        source: StoreError,
    },

    /// Any other store failure
    #[error("{operation} on {target} failed: {source}")]
    Store {
        operation: &'static str,
        target: String,
        #[source]
        source: StoreError,
    },

    /// A ledger row could not be decoded
    #[error("Corrupt migration record '{id}': {reason}")]
    CorruptRecord { id: String, reason: String },

    /// The backend cannot perform this operation
    #[error("{operation} is not implemented by this backend")]
    NotImplemented { operation: &'static str },

    /// A deadline or settling window expired
    #[error("{operation} timed out after {waited_ms}ms")]
    Timeout { operation: String, waited_ms: u64 },
}

impl DriverError {
    /// Stable machine-readable code
    pub fn kind(&self) -> &'static str {
        match self {
            DriverError::Configuration { .. } => "CONFIGURATION_ERROR",
            DriverError::Connection { .. } => "CONNECTION_ERROR",
            DriverError::Provisioning { .. } => "PROVISIONING_ERROR",
            DriverError::Index { .. } => "INDEX_ERROR",
            DriverError::Store { .. } => "STORE_ERROR",
            DriverError::CorruptRecord { .. } => "CORRUPT_RECORD",
            DriverError::NotImplemented { .. } => "NOT_IMPLEMENTED",
            DriverError::Timeout { .. } => "TIMEOUT",
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        DriverError::Configuration {
            message: message.into(),
        }
    }

    /// The wrapped store error, if any
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            DriverError::Connection { source, .. }
            | DriverError::Provisioning { source, .. }
            | DriverError::Index { source, .. }
            | DriverError::Store { source, .. } => Some(source),
            _ => None,
        }
    }
}
