//! # Lifecycle Driver
//!
//! The hook set a migration orchestrator calls, and the Couchbase
//! implementation of it. Hooks map directly onto the connection, provisioner,
//! ledger and schema components; this layer adds the per-operation deadline
//! and the closed-driver check.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::connection::Connection;
use super::errors::{DriverError, DriverResult};
use super::ledger::{MigrationLedger, MigrationRecord, MonotonicClock};
use super::provisioner::{NamespaceProvisioner, ProvisionOutcome};
use super::schema::SchemaOperations;
use super::settle::{with_deadline, SettlePolicy};
use crate::cluster::{ClusterBackend, StoreError};
use crate::config::DriverConfig;

/// Hooks invoked by a migration orchestrator, one at a time.
#[async_trait]
pub trait MigrationDriver: Send + Sync {
    /// Release the connection. Every later call fails, including a second close.
    async fn close(&mut self) -> DriverResult<()>;

    /// Marks the start of a migration run
    async fn start_migration(&self) -> DriverResult<()>;

    /// Marks the end of a migration run
    async fn end_migration(&self) -> DriverResult<()>;

    /// Applied migrations, most recently applied first
    async fn all_loaded_migrations(&self) -> DriverResult<Vec<MigrationRecord>>;

    /// Provision the tracking collection if needed
    async fn create_migrations_table(&self) -> DriverResult<ProvisionOutcome>;

    async fn add_migration_record(&self, name: &str) -> DriverResult<MigrationRecord>;

    /// Returns whether a record was removed
    async fn delete_migration(&self, name: &str) -> DriverResult<bool>;

    async fn create_collection(&self, name: &str, scope: Option<&str>) -> DriverResult<()>;

    async fn drop_collection(&self, name: &str, scope: Option<&str>) -> DriverResult<()>;

    async fn add_index(
        &self,
        collection: &str,
        index_name: &str,
        columns: &[String],
        scope: Option<&str>,
    ) -> DriverResult<()>;

    async fn remove_index(
        &self,
        collection: &str,
        index_name: &str,
        scope: Option<&str>,
    ) -> DriverResult<()>;

    async fn create_scope(&self, name: &str) -> DriverResult<()>;

    async fn drop_scope(&self, name: &str) -> DriverResult<()>;
}

/// Migration driver backed by a Couchbase cluster
pub struct CouchbaseDriver {
    connection: Option<Connection>,
    settle: SettlePolicy,
    deadline: Option<Duration>,
    clock: MonotonicClock,
}

impl CouchbaseDriver {
    /// Open the configured bucket on `cluster`.
    pub async fn init(config: &DriverConfig, cluster: Arc<dyn ClusterBackend>) -> DriverResult<Self> {
        let deadline = config.operation_timeout();
        let connection = with_deadline("init", deadline, Connection::open(config, cluster)).await?;
        Ok(Self::with_connection(connection, config))
    }

    /// Connect over HTTP to the cluster named in `config`.
    pub async fn connect(config: &DriverConfig) -> DriverResult<Self> {
        let deadline = config.operation_timeout();
        let connection = with_deadline("init", deadline, Connection::connect(config)).await?;
        Ok(Self::with_connection(connection, config))
    }

    fn with_connection(connection: Connection, config: &DriverConfig) -> Self {
        Self {
            connection: Some(connection),
            settle: config.settle_policy(),
            deadline: config.operation_timeout(),
            clock: MonotonicClock::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    fn open_connection(&self, operation: &'static str) -> DriverResult<&Connection> {
        self.connection.as_ref().ok_or_else(|| closed(operation))
    }

    fn ledger<'a>(&'a self, conn: &'a Connection) -> MigrationLedger<'a> {
        MigrationLedger::new(conn, &self.clock)
    }
}

fn closed(operation: &'static str) -> DriverError {
    DriverError::Connection {
        operation,
        source: StoreError::Transport {
            reason: "driver connection is closed".to_string(),
        },
    }
}

#[async_trait]
impl MigrationDriver for CouchbaseDriver {
    async fn close(&mut self) -> DriverResult<()> {
        let conn = self.connection.take().ok_or_else(|| closed("close"))?;
        with_deadline("close", self.deadline, conn.close()).await
    }

    async fn start_migration(&self) -> DriverResult<()> {
        self.open_connection("start_migration")?;
        debug!("migration run started");
        Ok(())
    }

    async fn end_migration(&self) -> DriverResult<()> {
        self.open_connection("end_migration")?;
        debug!("migration run ended");
        Ok(())
    }

    async fn all_loaded_migrations(&self) -> DriverResult<Vec<MigrationRecord>> {
        let conn = self.open_connection("all_loaded_migrations")?;
        let ledger = self.ledger(conn);
        with_deadline("all_loaded_migrations", self.deadline, ledger.list()).await
    }

    async fn create_migrations_table(&self) -> DriverResult<ProvisionOutcome> {
        let conn = self.open_connection("create_migrations_table")?;
        let provisioner = NamespaceProvisioner::new(conn, self.settle);
        with_deadline(
            "create_migrations_table",
            self.deadline,
            provisioner.ensure_tracking_namespace(),
        )
        .await
    }

    async fn add_migration_record(&self, name: &str) -> DriverResult<MigrationRecord> {
        let conn = self.open_connection("add_migration_record")?;
        let ledger = self.ledger(conn);
        with_deadline("add_migration_record", self.deadline, ledger.record(name)).await
    }

    async fn delete_migration(&self, name: &str) -> DriverResult<bool> {
        let conn = self.open_connection("delete_migration")?;
        let ledger = self.ledger(conn);
        with_deadline("delete_migration", self.deadline, ledger.unrecord(name)).await
    }

    async fn create_collection(&self, name: &str, scope: Option<&str>) -> DriverResult<()> {
        let conn = self.open_connection("create_collection")?;
        let schema = SchemaOperations::new(conn, self.settle);
        with_deadline("create_collection", self.deadline, schema.create_collection(name, scope)).await
    }

    async fn drop_collection(&self, name: &str, scope: Option<&str>) -> DriverResult<()> {
        let conn = self.open_connection("drop_collection")?;
        let schema = SchemaOperations::new(conn, self.settle);
        with_deadline("drop_collection", self.deadline, schema.drop_collection(name, scope)).await
    }

    async fn add_index(
        &self,
        collection: &str,
        index_name: &str,
        columns: &[String],
        scope: Option<&str>,
    ) -> DriverResult<()> {
        let conn = self.open_connection("add_index")?;
        let schema = SchemaOperations::new(conn, self.settle);
        with_deadline(
            "add_index",
            self.deadline,
            schema.add_index(collection, index_name, columns, scope),
        )
        .await
    }

    async fn remove_index(
        &self,
        collection: &str,
        index_name: &str,
        scope: Option<&str>,
    ) -> DriverResult<()> {
        let conn = self.open_connection("remove_index")?;
        let schema = SchemaOperations::new(conn, self.settle);
        with_deadline(
            "remove_index",
            self.deadline,
            schema.remove_index(collection, index_name, scope),
        )
        .await
    }

    async fn create_scope(&self, name: &str) -> DriverResult<()> {
        let conn = self.open_connection("create_scope")?;
        let schema = SchemaOperations::new(conn, self.settle);
        with_deadline("create_scope", self.deadline, schema.create_scope(name)).await
    }

    async fn drop_scope(&self, name: &str) -> DriverResult<()> {
        let conn = self.open_connection("drop_scope")?;
        let schema = SchemaOperations::new(conn, self.settle);
        with_deadline("drop_scope", self.deadline, schema.drop_scope(name)).await
    }
}
