//! # Connection Manager
//!
//! Owns one cluster connection and the resolved bucket for the lifetime of a
//! driver. Nothing else holds the backend; the provisioner, ledger and schema
//! operations borrow it per call.
//!
//! `close` consumes the connection, so a handle is released exactly once.

use std::sync::Arc;

use tracing::info;

use super::errors::{DriverError, DriverResult};
use crate::cluster::{ClusterBackend, Keyspace, RestCluster};
use crate::config::DriverConfig;

/// A live cluster connection with its bucket resolved
pub struct Connection {
    cluster: Arc<dyn ClusterBackend>,
    bucket: String,
    scope: String,
    collection: String,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("bucket", &self.bucket)
            .field("scope", &self.scope)
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Resolve the configured bucket on an already-connected backend.
    ///
    /// Fails with `Configuration` when the config is invalid (notably a
    /// missing bucket) and with `Connection` when the bucket lookup fails.
    pub async fn open(config: &DriverConfig, cluster: Arc<dyn ClusterBackend>) -> DriverResult<Self> {
        config.validate()?;
        let bucket = config.bucket_name()?.to_string();

        cluster
            .open_bucket(&bucket)
            .await
            .map_err(|source| DriverError::Connection {
                operation: "open_bucket",
                source,
            })?;

        info!(bucket = %bucket, scope = %config.scope, collection = %config.collection, "opened migration bucket");

        Ok(Self {
            cluster,
            bucket,
            scope: config.scope.clone(),
            collection: config.collection.clone(),
        })
    }

    /// Connect to the cluster named by `config` over HTTP, then resolve the bucket.
    pub async fn connect(config: &DriverConfig) -> DriverResult<Self> {
        config.validate()?;
        let host = config.resolved_host()?;

        let cluster = RestCluster::connect(
            &host,
            config.username.as_deref(),
            config.password.as_deref(),
        )
        .await
        .map_err(|source| DriverError::Connection {
            operation: "connect",
            source,
        })?;

        Self::open(config, Arc::new(cluster)).await
    }

    /// Release the connection.
    pub async fn close(self) -> DriverResult<()> {
        self.cluster
            .close()
            .await
            .map_err(|source| DriverError::Connection {
                operation: "close",
                source,
            })?;
        info!(bucket = %self.bucket, "closed cluster connection");
        Ok(())
    }

    pub fn cluster(&self) -> &dyn ClusterBackend {
        self.cluster.as_ref()
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Scope used when a caller does not name one
    pub fn default_scope(&self) -> &str {
        &self.scope
    }

    /// Keyspace of the migration ledger
    pub fn tracking_keyspace(&self) -> Keyspace {
        Keyspace::new(&self.bucket, &self.scope, &self.collection)
    }

    /// Keyspace of `collection` in `scope`, or in the default scope
    pub fn keyspace(&self, collection: &str, scope: Option<&str>) -> Keyspace {
        Keyspace::new(&self.bucket, scope.unwrap_or(&self.scope), collection)
    }
}
