//! # Schema Operations
//!
//! Scope, collection and index changes issued by migration scripts. Each
//! namespace change waits until the cluster reports it before returning, so
//! a migration that creates a collection can write to it on the next line and
//! one that drops a collection can immediately recreate it.
//!
//! Unlike the provisioner, these operations do not tolerate "already exists":
//! a migration that creates something twice is a bug worth surfacing.

use tracing::info;

use super::connection::Connection;
use super::errors::{DriverError, DriverResult};
use super::settle::{self, SettlePolicy};
use crate::cluster::statement::{validate_index_columns, validate_index_name};
use crate::cluster::{Keyspace, Statement, StoreError};

pub struct SchemaOperations<'a> {
    conn: &'a Connection,
    settle: SettlePolicy,
}

impl<'a> SchemaOperations<'a> {
    pub fn new(conn: &'a Connection, settle: SettlePolicy) -> Self {
        Self { conn, settle }
    }

    /// Create a scope in the driver's bucket and wait until it is visible.
    pub async fn create_scope(&self, name: &str) -> DriverResult<()> {
        let cluster = self.conn.cluster();
        let bucket = self.conn.bucket();

        match cluster.create_scope(bucket, name).await {
            Ok(()) => {}
            Err(StoreError::Unsupported { .. }) => {
                return Err(DriverError::NotImplemented {
                    operation: "create_scope",
                })
            }
            Err(source) => {
                return Err(DriverError::Provisioning {
                    operation: "create_scope",
                    target: format!("{}.{}", bucket, name),
                    source,
                })
            }
        }

        settle::wait_until("create_scope", &self.settle, || async move {
            matches!(cluster.scope_exists(bucket, name).await, Ok(true))
        })
        .await?;

        info!(bucket = %bucket, scope = %name, "created scope");
        Ok(())
    }

    /// Drop a scope and every collection in it, then wait until it is gone.
    pub async fn drop_scope(&self, name: &str) -> DriverResult<()> {
        let cluster = self.conn.cluster();
        let bucket = self.conn.bucket();

        match cluster.drop_scope(bucket, name).await {
            Ok(()) => {}
            Err(StoreError::Unsupported { .. }) => {
                return Err(DriverError::NotImplemented {
                    operation: "drop_scope",
                })
            }
            Err(source) => {
                return Err(DriverError::Store {
                    operation: "drop_scope",
                    target: format!("{}.{}", bucket, name),
                    source,
                })
            }
        }

        settle::wait_until("drop_scope", &self.settle, || async move {
            matches!(cluster.scope_exists(bucket, name).await, Ok(false))
        })
        .await?;

        info!(bucket = %bucket, scope = %name, "dropped scope");
        Ok(())
    }

    /// Create a collection, wait for it, then give it a primary index.
    pub async fn create_collection(&self, name: &str, scope: Option<&str>) -> DriverResult<()> {
        let cluster = self.conn.cluster();
        let keyspace = self.conn.keyspace(name, scope);
        let ks = &keyspace;

        cluster
            .create_collection(&ks.bucket, &ks.scope, &ks.collection)
            .await
            .map_err(|source| DriverError::Provisioning {
                operation: "create_collection",
                target: ks.path(),
                source,
            })?;

        settle::wait_until("create_collection", &self.settle, || async move {
            matches!(
                cluster
                    .collection_exists(&ks.bucket, &ks.scope, &ks.collection)
                    .await,
                Ok(true)
            )
        })
        .await?;

        let statement = Statement::CreatePrimaryIndex {
            keyspace: keyspace.clone(),
        };
        let stmt = &statement;
        let outcome = settle::retry_while_propagating("create_primary_index", &self.settle, || async move {
            cluster.query(stmt).await
        })
        .await?;
        match outcome {
            Ok(_) => {}
            Err(e) if e.is_already_exists() => {}
            Err(source) => {
                return Err(DriverError::Provisioning {
                    operation: "create_primary_index",
                    target: keyspace.path(),
                    source,
                })
            }
        }

        info!(keyspace = %keyspace.path(), "created collection");
        Ok(())
    }

    /// Drop a collection and wait until the cluster no longer reports it.
    pub async fn drop_collection(&self, name: &str, scope: Option<&str>) -> DriverResult<()> {
        let cluster = self.conn.cluster();
        let keyspace = self.conn.keyspace(name, scope);
        let ks = &keyspace;

        cluster
            .drop_collection(&ks.bucket, &ks.scope, &ks.collection)
            .await
            .map_err(|source| DriverError::Store {
                operation: "drop_collection",
                target: ks.path(),
                source,
            })?;

        settle::wait_until("drop_collection", &self.settle, || async move {
            matches!(
                cluster
                    .collection_exists(&ks.bucket, &ks.scope, &ks.collection)
                    .await,
                Ok(false)
            )
        })
        .await?;

        info!(keyspace = %keyspace.path(), "dropped collection");
        Ok(())
    }

    /// Create a secondary index over `columns`, in order.
    pub async fn add_index(
        &self,
        collection: &str,
        index_name: &str,
        columns: &[String],
        scope: Option<&str>,
    ) -> DriverResult<()> {
        let keyspace = self.conn.keyspace(collection, scope);
        let wrap = |source: StoreError| DriverError::Index {
            operation: "add_index",
            target: index_target(&keyspace, index_name),
            source,
        };

        validate_index_name(index_name).map_err(wrap)?;
        validate_index_columns(columns).map_err(wrap)?;

        let statement = Statement::CreateIndex {
            name: index_name.to_string(),
            keyspace: keyspace.clone(),
            columns: columns.to_vec(),
        };
        self.conn.cluster().query(&statement).await.map_err(wrap)?;

        info!(keyspace = %keyspace.path(), index = %index_name, columns = ?columns, "created index");
        Ok(())
    }

    /// Drop a secondary index. A missing index is an error.
    pub async fn remove_index(
        &self,
        collection: &str,
        index_name: &str,
        scope: Option<&str>,
    ) -> DriverResult<()> {
        let keyspace = self.conn.keyspace(collection, scope);
        let statement = Statement::DropIndex {
            keyspace: keyspace.clone(),
            name: index_name.to_string(),
        };

        self.conn
            .cluster()
            .query(&statement)
            .await
            .map_err(|source| DriverError::Index {
                operation: "remove_index",
                target: index_target(&keyspace, index_name),
                source,
            })?;

        info!(keyspace = %keyspace.path(), index = %index_name, "dropped index");
        Ok(())
    }
}

fn index_target(keyspace: &Keyspace, index_name: &str) -> String {
    format!("{}.{}", keyspace.path(), index_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterBackend, InMemoryCluster, StoreResult};
    use crate::config::DriverConfig;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_settle() -> SettlePolicy {
        SettlePolicy {
            interval: Duration::from_millis(5),
            timeout: Duration::from_secs(2),
        }
    }

    async fn open(cluster: Arc<dyn ClusterBackend>) -> Connection {
        Connection::open(&DriverConfig::for_bucket("app"), cluster)
            .await
            .unwrap()
    }

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|c| c.to_string()).collect()
    }

    #[tokio::test]
    async fn test_create_collection_is_usable_on_return() {
        let cluster = Arc::new(
            InMemoryCluster::new()
                .with_bucket("app")
                .with_propagation_delay(Duration::from_millis(40)),
        );
        let conn = open(cluster.clone()).await;
        let schema = SchemaOperations::new(&conn, fast_settle());

        schema.create_collection("users", None).await.unwrap();

        let ks = conn.keyspace("users", None);
        assert_eq!(cluster.primary_index_count(&ks), 1);
        cluster.upsert(&ks, "u1", json!({ "email": "a@b" })).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_existing_collection_fails() {
        let cluster = Arc::new(InMemoryCluster::new().with_bucket("app"));
        let conn = open(cluster.clone()).await;
        let schema = SchemaOperations::new(&conn, fast_settle());

        schema.create_collection("users", None).await.unwrap();
        let err = schema.create_collection("users", None).await.unwrap_err();
        assert_eq!(err.kind(), "PROVISIONING_ERROR");
        assert!(err.to_string().contains("app._default.users"));
    }

    #[tokio::test]
    async fn test_drop_then_recreate_collection() {
        let cluster = Arc::new(InMemoryCluster::new().with_bucket("app"));
        let conn = open(cluster.clone()).await;
        let schema = SchemaOperations::new(&conn, fast_settle());

        schema.create_collection("users", None).await.unwrap();
        schema.drop_collection("users", None).await.unwrap();
        assert!(!cluster.has_collection(&conn.keyspace("users", None)));

        schema.create_collection("users", None).await.unwrap();

        schema.drop_collection("users", None).await.unwrap();
        let err = schema.drop_collection("users", None).await.unwrap_err();
        assert_eq!(err.kind(), "STORE_ERROR");
    }

    #[tokio::test]
    async fn test_drop_waits_before_recreate() {
        let cluster = Arc::new(
            InMemoryCluster::new()
                .with_bucket("app")
                .with_propagation_delay(Duration::from_millis(40)),
        );
        let conn = open(cluster.clone()).await;
        let schema = SchemaOperations::new(&conn, fast_settle());
        let ks = conn.keyspace("users", None);

        schema.create_collection("users", None).await.unwrap();
        schema.drop_collection("users", None).await.unwrap();
        assert!(!cluster.has_collection(&ks));

        // Would fail with "exists" had the drop not settled
        schema.create_collection("users", None).await.unwrap();
        assert_eq!(cluster.primary_index_count(&ks), 1);
    }

    #[tokio::test]
    async fn test_collection_in_new_scope() {
        let cluster = Arc::new(
            InMemoryCluster::new()
                .with_bucket("app")
                .with_propagation_delay(Duration::from_millis(20)),
        );
        let conn = open(cluster.clone()).await;
        let schema = SchemaOperations::new(&conn, fast_settle());

        schema.create_scope("tenant").await.unwrap();
        schema.create_collection("orders", Some("tenant")).await.unwrap();
        assert_eq!(
            cluster.primary_index_count(&Keyspace::new("app", "tenant", "orders")),
            1
        );

        let err = schema.create_scope("tenant").await.unwrap_err();
        assert_eq!(err.kind(), "PROVISIONING_ERROR");

        schema.drop_scope("tenant").await.unwrap();
        assert!(!cluster.has_scope("app", "tenant"));
    }

    #[tokio::test]
    async fn test_index_lifecycle() {
        let cluster = Arc::new(InMemoryCluster::new().with_bucket("app"));
        let conn = open(cluster.clone()).await;
        let schema = SchemaOperations::new(&conn, fast_settle());
        schema.create_collection("users", None).await.unwrap();
        let ks = conn.keyspace("users", None);

        schema
            .add_index("users", "idx_email", &columns(&["email"]), None)
            .await
            .unwrap();
        assert_eq!(cluster.index_columns(&ks, "idx_email"), Some(columns(&["email"])));

        schema.remove_index("users", "idx_email", None).await.unwrap();
        assert!(!cluster.index_names(&ks).contains(&"idx_email".to_string()));

        let err = schema.remove_index("users", "idx_email", None).await.unwrap_err();
        assert_eq!(err.kind(), "INDEX_ERROR");
        assert!(err.to_string().contains("app._default.users.idx_email"));
    }

    #[tokio::test]
    async fn test_composite_index_keeps_column_order() {
        let cluster = Arc::new(InMemoryCluster::new().with_bucket("app"));
        let conn = open(cluster.clone()).await;
        let schema = SchemaOperations::new(&conn, fast_settle());
        schema.create_collection("users", None).await.unwrap();

        schema
            .add_index("users", "idx_name", &columns(&["last_name", "first_name"]), None)
            .await
            .unwrap();

        assert_eq!(
            cluster.index_columns(&conn.keyspace("users", None), "idx_name"),
            Some(columns(&["last_name", "first_name"]))
        );
        assert!(cluster.executed_statements().contains(
            &"CREATE INDEX `idx_name` ON `app`.`_default`.`users`(last_name, first_name)".to_string()
        ));
    }

    #[tokio::test]
    async fn test_malformed_index_is_rejected_before_sending() {
        let cluster = Arc::new(InMemoryCluster::new().with_bucket("app"));
        let conn = open(cluster.clone()).await;
        let schema = SchemaOperations::new(&conn, fast_settle());
        schema.create_collection("users", None).await.unwrap();
        let before = cluster.executed_statements().len();

        let err = schema
            .add_index("users", "idx email", &columns(&["email"]), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "INDEX_ERROR");

        let err = schema
            .add_index("users", "idx_email", &columns(&["lower(email"]), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "INDEX_ERROR");

        let err = schema.add_index("users", "idx_none", &[], None).await.unwrap_err();
        assert_eq!(err.kind(), "INDEX_ERROR");

        assert_eq!(cluster.executed_statements().len(), before);
    }

    #[tokio::test]
    async fn test_duplicate_index_is_index_error() {
        let cluster = Arc::new(InMemoryCluster::new().with_bucket("app"));
        let conn = open(cluster.clone()).await;
        let schema = SchemaOperations::new(&conn, fast_settle());
        schema.create_collection("users", None).await.unwrap();

        schema
            .add_index("users", "idx_email", &columns(&["email"]), None)
            .await
            .unwrap();
        let err = schema
            .add_index("users", "idx_email", &columns(&["email"]), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "INDEX_ERROR");
        assert!(err.store_error().map(|e| e.is_already_exists()).unwrap_or(false));
    }

    /// Backend with collection support only
    struct CollectionsOnly(InMemoryCluster);

    #[async_trait]
    impl ClusterBackend for CollectionsOnly {
        async fn open_bucket(&self, bucket: &str) -> StoreResult<()> {
            self.0.open_bucket(bucket).await
        }
        async fn close(&self) -> StoreResult<()> {
            self.0.close().await
        }
        async fn upsert(&self, keyspace: &Keyspace, key: &str, document: Value) -> StoreResult<()> {
            self.0.upsert(keyspace, key, document).await
        }
        async fn get(&self, keyspace: &Keyspace, key: &str) -> StoreResult<Value> {
            self.0.get(keyspace, key).await
        }
        async fn remove(&self, keyspace: &Keyspace, key: &str) -> StoreResult<()> {
            self.0.remove(keyspace, key).await
        }
        async fn query(&self, statement: &Statement) -> StoreResult<Vec<Value>> {
            self.0.query(statement).await
        }
        async fn create_collection(&self, b: &str, s: &str, c: &str) -> StoreResult<()> {
            self.0.create_collection(b, s, c).await
        }
        async fn drop_collection(&self, b: &str, s: &str, c: &str) -> StoreResult<()> {
            self.0.drop_collection(b, s, c).await
        }
        async fn collection_exists(&self, b: &str, s: &str, c: &str) -> StoreResult<bool> {
            self.0.collection_exists(b, s, c).await
        }
    }

    #[tokio::test]
    async fn test_scope_operations_without_backend_support() {
        let cluster = Arc::new(CollectionsOnly(InMemoryCluster::new().with_bucket("app")));
        let conn = open(cluster).await;
        let schema = SchemaOperations::new(&conn, fast_settle());

        let err = schema.create_scope("tenant").await.unwrap_err();
        assert_eq!(err.kind(), "NOT_IMPLEMENTED");
        let err = schema.drop_scope("tenant").await.unwrap_err();
        assert_eq!(err.kind(), "NOT_IMPLEMENTED");

        schema.create_collection("users", None).await.unwrap();
    }
}
