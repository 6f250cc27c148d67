//! # Cluster Backends
//!
//! The driver reaches the database only through [`ClusterBackend`]. A backend
//! owns the transport; the driver owns the protocol (probing, settling,
//! ledger layout).
//!
//! # Backends
//!
//! - [`InMemoryCluster`]: in-process cluster with simulated metadata
//!   propagation, used by tests and embedders
//! - [`RestCluster`]: cluster-management REST API plus the query service

pub mod errors;
pub mod memory;
pub mod rest;
pub mod statement;

pub use errors::{StoreError, StoreResult};
pub use memory::InMemoryCluster;
pub use rest::RestCluster;
pub use statement::{SortKey, Statement};

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use statement::quote_identifier;

/// Fully qualified location of a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Keyspace {
    pub bucket: String,
    pub scope: String,
    pub collection: String,
}

impl Keyspace {
    pub fn new(
        bucket: impl Into<String>,
        scope: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            scope: scope.into(),
            collection: collection.into(),
        }
    }

    /// Unquoted dotted path, used in logs and error messages
    pub fn path(&self) -> String {
        format!("{}.{}.{}", self.bucket, self.scope, self.collection)
    }
}

impl fmt::Display for Keyspace {
    /// Quoted form for statements: `` `bucket`.`scope`.`collection` ``
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            quote_identifier(&self.bucket),
            quote_identifier(&self.scope),
            quote_identifier(&self.collection)
        )
    }
}

/// Store backend trait
///
/// Every method is a suspension point. Implementations must not retry
/// internally; retry and settling policy belong to the driver.
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    /// Resolve a bucket, failing with `BucketNotFound` if it does not exist
    async fn open_bucket(&self, bucket: &str) -> StoreResult<()>;

    /// Release the connection. A second call fails.
    async fn close(&self) -> StoreResult<()>;

    /// Insert or overwrite a document
    async fn upsert(&self, keyspace: &Keyspace, key: &str, document: Value) -> StoreResult<()>;

    /// Fetch a document, `DocumentNotFound` if absent
    async fn get(&self, keyspace: &Keyspace, key: &str) -> StoreResult<Value>;

    /// Remove a document, `DocumentNotFound` if absent
    async fn remove(&self, keyspace: &Keyspace, key: &str) -> StoreResult<()>;

    /// Execute a statement and return its result rows
    async fn query(&self, statement: &Statement) -> StoreResult<Vec<Value>>;

    async fn create_collection(&self, bucket: &str, scope: &str, collection: &str)
        -> StoreResult<()>;

    async fn drop_collection(&self, bucket: &str, scope: &str, collection: &str)
        -> StoreResult<()>;

    /// Metadata check; may lag behind recent creates and drops
    async fn collection_exists(&self, bucket: &str, scope: &str, collection: &str)
        -> StoreResult<bool>;

    async fn create_scope(&self, _bucket: &str, _scope: &str) -> StoreResult<()> {
        Err(StoreError::Unsupported {
            operation: "create_scope",
        })
    }

    async fn drop_scope(&self, _bucket: &str, _scope: &str) -> StoreResult<()> {
        Err(StoreError::Unsupported {
            operation: "drop_scope",
        })
    }

    async fn scope_exists(&self, _bucket: &str, _scope: &str) -> StoreResult<bool> {
        Err(StoreError::Unsupported {
            operation: "scope_exists",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyspace_display() {
        let ks = Keyspace::new("app", "_default", "migrations");
        assert_eq!(ks.to_string(), "`app`.`_default`.`migrations`");
        assert_eq!(ks.path(), "app._default.migrations");
    }
}
