//! # Namespace Provisioner
//!
//! Makes sure the tracking collection exists, is writable and has a primary
//! index before the ledger is used.
//!
//! Collection metadata is eventually consistent, so a manifest lookup cannot
//! answer "is the collection usable". The provisioner runs a write probe
//! instead: upsert a sentinel document into the tracking collection and remove
//! it again. A successful upsert means provisioned, even when the cleanup
//! fails (the leftover sentinel is logged and skipped by the ledger). A failed
//! upsert means "not provisioned" and starts the provisioning sequence:
//!
//! 1. Create the scope if it is missing, then the collection. "Already exists"
//!    counts as success so concurrent provisioners cannot fail each other.
//! 2. Poll the write probe until the collection is visible (bounded).
//! 3. Create the primary index, again tolerating "already exists".
//!
//! When the probe succeeds the primary index is still requested, which repairs
//! a namespace left half-provisioned by an interrupted run.

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::connection::Connection;
use super::errors::{DriverError, DriverResult};
use super::settle::{self, SettlePolicy};
use crate::cluster::{ClusterBackend, Keyspace, Statement, StoreError};

/// Key prefix of the sentinel document written by the probe
pub const PROBE_KEY_PREFIX: &str = "TestMigrationExist";

/// What `ensure_tracking_namespace` found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionOutcome {
    /// The collection was already usable
    Existing,
    /// The collection was created by this call
    Created,
}

/// Whether a document key belongs to a write-probe sentinel
pub fn is_sentinel_key(key: &str) -> bool {
    key.strip_prefix(PROBE_KEY_PREFIX)
        .is_some_and(|rest| rest.starts_with('-'))
}

/// Result of a write probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    /// The upsert failed; the collection is not usable yet
    Absent,
    /// The sentinel was written and removed
    Present,
    /// The sentinel was written but could not be removed
    Orphaned { key: String },
}

impl ProbeResult {
    /// True when the collection accepted the write
    pub fn is_writable(&self) -> bool {
        !matches!(self, ProbeResult::Absent)
    }
}

/// Upsert and remove a sentinel document.
///
/// Each probe uses its own key so concurrent probers never remove each
/// other's sentinel. A failed removal is retried once before the sentinel is
/// reported as orphaned.
pub async fn write_probe(cluster: &dyn ClusterBackend, keyspace: &Keyspace) -> ProbeResult {
    let key = format!("{}-{}", PROBE_KEY_PREFIX, Uuid::new_v4());

    if let Err(e) = cluster.upsert(keyspace, &key, json!({ "ok": true })).await {
        debug!(keyspace = %keyspace.path(), error = %e, "write probe failed");
        return ProbeResult::Absent;
    }

    for attempt in 1..=2 {
        match cluster.remove(keyspace, &key).await {
            Ok(()) => return ProbeResult::Present,
            Err(StoreError::DocumentNotFound { .. }) => return ProbeResult::Present,
            Err(e) => {
                debug!(keyspace = %keyspace.path(), key = %key, attempt, error = %e, "write probe cleanup failed");
            }
        }
    }

    warn!(keyspace = %keyspace.path(), key = %key, "write probe left its sentinel document behind");
    ProbeResult::Orphaned { key }
}

/// Lazily provisions the tracking namespace
pub struct NamespaceProvisioner<'a> {
    conn: &'a Connection,
    settle: SettlePolicy,
}

impl<'a> NamespaceProvisioner<'a> {
    pub fn new(conn: &'a Connection, settle: SettlePolicy) -> Self {
        Self { conn, settle }
    }

    /// Ensure the tracking collection exists and is queryable.
    pub async fn ensure_tracking_namespace(&self) -> DriverResult<ProvisionOutcome> {
        let keyspace = self.conn.tracking_keyspace();
        let cluster = self.conn.cluster();

        if write_probe(cluster, &keyspace).await.is_writable() {
            debug!(keyspace = %keyspace.path(), "tracking collection already provisioned");
            if self.ensure_primary_index(&keyspace).await? {
                warn!(keyspace = %keyspace.path(), "repaired missing primary index on tracking collection");
            }
            return Ok(ProvisionOutcome::Existing);
        }

        info!(keyspace = %keyspace.path(), "initializing migrations collection");
        self.create_collection(&keyspace).await?;

        let ks = &keyspace;
        settle::wait_until("tracking collection propagation", &self.settle, || async move {
            write_probe(cluster, ks).await.is_writable()
        })
        .await?;

        self.ensure_primary_index(&keyspace).await?;
        info!(keyspace = %keyspace.path(), "initialized migrations collection");
        Ok(ProvisionOutcome::Created)
    }

    async fn create_collection(&self, keyspace: &Keyspace) -> DriverResult<()> {
        let cluster = self.conn.cluster();
        let create = || async move {
            cluster
                .create_collection(&keyspace.bucket, &keyspace.scope, &keyspace.collection)
                .await
        };

        let outcome = match create().await {
            Err(StoreError::ScopeNotFound { .. }) => {
                self.create_scope(keyspace).await?;
                settle::retry_while_propagating("tracking scope propagation", &self.settle, create)
                    .await?
            }
            outcome => outcome,
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(e) if e.is_already_exists() => {
                debug!(keyspace = %keyspace.path(), "collection already created by another process");
                Ok(())
            }
            Err(source) => Err(DriverError::Provisioning {
                operation: "create_collection",
                target: keyspace.path(),
                source,
            }),
        }
    }

    async fn create_scope(&self, keyspace: &Keyspace) -> DriverResult<()> {
        info!(bucket = %keyspace.bucket, scope = %keyspace.scope, "creating tracking scope");
        match self
            .conn
            .cluster()
            .create_scope(&keyspace.bucket, &keyspace.scope)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_already_exists() => Ok(()),
            Err(StoreError::Unsupported { .. }) => Err(DriverError::NotImplemented {
                operation: "create_scope",
            }),
            Err(source) => Err(DriverError::Provisioning {
                operation: "create_scope",
                target: format!("{}.{}", keyspace.bucket, keyspace.scope),
                source,
            }),
        }
    }

    /// Returns true when the index had to be created.
    async fn ensure_primary_index(&self, keyspace: &Keyspace) -> DriverResult<bool> {
        let cluster = self.conn.cluster();
        let statement = Statement::CreatePrimaryIndex {
            keyspace: keyspace.clone(),
        };
        let stmt = &statement;

        let outcome = settle::retry_while_propagating("primary index creation", &self.settle, || async move {
            cluster.query(stmt).await
        })
        .await?;

        match outcome {
            Ok(_) => {
                debug!(keyspace = %keyspace.path(), "primary index created");
                Ok(true)
            }
            Err(e) if e.is_already_exists() => Ok(false),
            Err(source) => Err(DriverError::Provisioning {
                operation: "create_primary_index",
                target: keyspace.path(),
                source,
            }),
        }
    }
}
