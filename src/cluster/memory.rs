//! # In-Memory Cluster
//!
//! An in-process [`ClusterBackend`] that behaves like a small cluster:
//!
//! - Newly created scopes and collections stay invisible to data and query
//!   operations until a configurable propagation delay has elapsed
//! - Dropped collections stop serving data at once but stay in the manifest
//!   for the same delay, so recreating one too early fails with "exists"
//! - Collections cannot serve ordered queries until a primary index exists
//! - Creating something that exists, or dropping something that does not,
//!   fails the way the real services do
//! - Any operation can be made to fail once via [`InMemoryCluster::inject_fault`]
//!
//! State is fully deterministic apart from the propagation clock.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::time::Instant;

use super::errors::{StoreError, StoreResult};
use super::statement::{validate_index_columns, validate_index_name, SortKey, Statement};
use super::{ClusterBackend, Keyspace};

const DEFAULT_NAME: &str = "_default";

#[derive(Debug, Clone)]
struct IndexDefinition {
    primary: bool,
    columns: Vec<String>,
}

#[derive(Debug)]
struct CollectionState {
    visible_at: Instant,
    /// Set when dropped; the entry is purged once this instant passes
    dropped_until: Option<Instant>,
    documents: BTreeMap<String, Value>,
    indexes: BTreeMap<String, IndexDefinition>,
}

impl CollectionState {
    fn new(visible_at: Instant) -> Self {
        Self {
            visible_at,
            dropped_until: None,
            documents: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.visible_at <= now && self.dropped_until.is_none()
    }

    fn has_primary(&self) -> bool {
        self.indexes.values().any(|i| i.primary)
    }
}

#[derive(Debug)]
struct ScopeState {
    visible_at: Instant,
    collections: BTreeMap<String, CollectionState>,
}

#[derive(Debug, Default)]
struct ClusterState {
    buckets: BTreeMap<String, BTreeMap<String, ScopeState>>,
    closed: bool,
    faults: HashMap<&'static str, StoreError>,
    executed: Vec<String>,
}

impl ClusterState {
    /// Common entry check: closed connection, then any injected fault.
    /// Also forgets collections whose drop has finished propagating.
    fn guard(&mut self, operation: &'static str) -> StoreResult<()> {
        if self.closed {
            return Err(StoreError::Transport {
                reason: "connection is closed".to_string(),
            });
        }
        if let Some(err) = self.faults.remove(operation) {
            return Err(err);
        }
        self.purge_dropped(Instant::now());
        Ok(())
    }

    fn purge_dropped(&mut self, now: Instant) {
        for scopes in self.buckets.values_mut() {
            for scope in scopes.values_mut() {
                scope
                    .collections
                    .retain(|_, c| c.dropped_until.map_or(true, |until| until > now));
            }
        }
    }

    fn scopes(&self, bucket: &str) -> StoreResult<&BTreeMap<String, ScopeState>> {
        self.buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound {
                bucket: bucket.to_string(),
            })
    }

    fn scopes_mut(&mut self, bucket: &str) -> StoreResult<&mut BTreeMap<String, ScopeState>> {
        self.buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound {
                bucket: bucket.to_string(),
            })
    }

    fn visible_scope_mut(
        &mut self,
        bucket: &str,
        scope: &str,
        now: Instant,
    ) -> StoreResult<&mut ScopeState> {
        self.scopes_mut(bucket)?
            .get_mut(scope)
            .filter(|s| s.visible_at <= now)
            .ok_or_else(|| StoreError::ScopeNotFound {
                scope: scope.to_string(),
            })
    }

    fn visible_collection(&self, keyspace: &Keyspace, now: Instant) -> StoreResult<&CollectionState> {
        let scope = self
            .scopes(&keyspace.bucket)?
            .get(&keyspace.scope)
            .filter(|s| s.visible_at <= now)
            .ok_or_else(|| StoreError::ScopeNotFound {
                scope: keyspace.scope.clone(),
            })?;
        scope
            .collections
            .get(&keyspace.collection)
            .filter(|c| c.is_live(now))
            .ok_or_else(|| StoreError::CollectionNotFound {
                keyspace: keyspace.path(),
            })
    }

    fn visible_collection_mut(
        &mut self,
        keyspace: &Keyspace,
        now: Instant,
    ) -> StoreResult<&mut CollectionState> {
        let scope = self.visible_scope_mut(&keyspace.bucket, &keyspace.scope, now)?;
        scope
            .collections
            .get_mut(&keyspace.collection)
            .filter(|c| c.is_live(now))
            .ok_or_else(|| StoreError::CollectionNotFound {
                keyspace: keyspace.path(),
            })
    }
}

/// In-memory cluster backend
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
    propagation_delay: Duration,
}

impl InMemoryCluster {
    /// Create an empty cluster with no buckets and no propagation delay
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bucket holding the `_default` scope and `_default` collection
    pub fn with_bucket(self, bucket: &str) -> Self {
        {
            let mut state = self.lock();
            let now = Instant::now();
            let mut default_scope = ScopeState {
                visible_at: now,
                collections: BTreeMap::new(),
            };
            default_scope
                .collections
                .insert(DEFAULT_NAME.to_string(), CollectionState::new(now));
            let mut scopes = BTreeMap::new();
            scopes.insert(DEFAULT_NAME.to_string(), default_scope);
            state.buckets.insert(bucket.to_string(), scopes);
        }
        self
    }

    /// Delay between creating a scope/collection and it becoming usable
    pub fn with_propagation_delay(mut self, delay: Duration) -> Self {
        self.propagation_delay = delay;
        self
    }

    /// Make the next call of `operation` fail with `error`.
    ///
    /// Operation names match the [`ClusterBackend`] method names.
    pub fn inject_fault(&self, operation: &'static str, error: StoreError) {
        self.lock().faults.insert(operation, error);
    }

    /// Names of all indexes on a collection, regardless of visibility
    pub fn index_names(&self, keyspace: &Keyspace) -> Vec<String> {
        self.with_collection(keyspace, |c| c.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Column list of an index, if it exists
    pub fn index_columns(&self, keyspace: &Keyspace, index: &str) -> Option<Vec<String>> {
        self.with_collection(keyspace, |c| c.indexes.get(index).map(|i| i.columns.clone()))
            .flatten()
    }

    /// Number of primary indexes on a collection
    pub fn primary_index_count(&self, keyspace: &Keyspace) -> usize {
        self.with_collection(keyspace, |c| c.indexes.values().filter(|i| i.primary).count())
            .unwrap_or(0)
    }

    /// Document body stored under `key`, regardless of visibility
    pub fn document(&self, keyspace: &Keyspace, key: &str) -> Option<Value> {
        self.with_collection(keyspace, |c| c.documents.get(key).cloned())
            .flatten()
    }

    /// Number of documents in a collection
    pub fn document_count(&self, keyspace: &Keyspace) -> usize {
        self.with_collection(keyspace, |c| c.documents.len())
            .unwrap_or(0)
    }

    /// Whether the collection is present in the manifest, visible or not.
    /// A dropped collection counts until its drop has propagated.
    pub fn has_collection(&self, keyspace: &Keyspace) -> bool {
        let now = Instant::now();
        self.with_collection(keyspace, |c| c.dropped_until.map_or(true, |until| until > now))
            .unwrap_or(false)
    }

    /// Whether the scope is present in the manifest, visible or not
    pub fn has_scope(&self, bucket: &str, scope: &str) -> bool {
        self.lock()
            .buckets
            .get(bucket)
            .map(|scopes| scopes.contains_key(scope))
            .unwrap_or(false)
    }

    /// Text of every statement executed so far, in order
    pub fn executed_statements(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_collection<T>(
        &self,
        keyspace: &Keyspace,
        f: impl FnOnce(&CollectionState) -> T,
    ) -> Option<T> {
        let state = self.lock();
        state
            .buckets
            .get(&keyspace.bucket)
            .and_then(|scopes| scopes.get(&keyspace.scope))
            .and_then(|scope| scope.collections.get(&keyspace.collection))
            .map(f)
    }

    fn ready_at(&self) -> Instant {
        Instant::now() + self.propagation_delay
    }
}

#[async_trait]
impl ClusterBackend for InMemoryCluster {
    async fn open_bucket(&self, bucket: &str) -> StoreResult<()> {
        let mut state = self.lock();
        state.guard("open_bucket")?;
        state.scopes(bucket).map(|_| ())
    }

    async fn close(&self) -> StoreResult<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(StoreError::Transport {
                reason: "connection already closed".to_string(),
            });
        }
        state.guard("close")?;
        state.closed = true;
        Ok(())
    }

    async fn upsert(&self, keyspace: &Keyspace, key: &str, document: Value) -> StoreResult<()> {
        let mut state = self.lock();
        state.guard("upsert")?;
        let collection = state.visible_collection_mut(keyspace, Instant::now())?;
        collection.documents.insert(key.to_string(), document);
        Ok(())
    }

    async fn get(&self, keyspace: &Keyspace, key: &str) -> StoreResult<Value> {
        let mut state = self.lock();
        state.guard("get")?;
        let collection = state.visible_collection(keyspace, Instant::now())?;
        collection
            .documents
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::DocumentNotFound {
                key: key.to_string(),
            })
    }

    async fn remove(&self, keyspace: &Keyspace, key: &str) -> StoreResult<()> {
        let mut state = self.lock();
        state.guard("remove")?;
        let collection = state.visible_collection_mut(keyspace, Instant::now())?;
        collection
            .documents
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::DocumentNotFound {
                key: key.to_string(),
            })
    }

    async fn query(&self, statement: &Statement) -> StoreResult<Vec<Value>> {
        let mut state = self.lock();
        state.guard("query")?;
        state.executed.push(statement.to_string());
        let now = Instant::now();

        match statement {
            Statement::CreatePrimaryIndex { keyspace } => {
                let collection = state.visible_collection_mut(keyspace, now)?;
                if collection.has_primary() {
                    return Err(StoreError::IndexExists {
                        index: format!("{}.{}", keyspace.path(), super::statement::PRIMARY_INDEX_NAME),
                    });
                }
                collection.indexes.insert(
                    super::statement::PRIMARY_INDEX_NAME.to_string(),
                    IndexDefinition {
                        primary: true,
                        columns: Vec::new(),
                    },
                );
                Ok(Vec::new())
            }
            Statement::CreateIndex {
                name,
                keyspace,
                columns,
            } => {
                validate_index_name(name)?;
                validate_index_columns(columns)?;
                let collection = state.visible_collection_mut(keyspace, now)?;
                if collection.indexes.contains_key(name) {
                    return Err(StoreError::IndexExists {
                        index: format!("{}.{}", keyspace.path(), name),
                    });
                }
                collection.indexes.insert(
                    name.clone(),
                    IndexDefinition {
                        primary: false,
                        columns: columns.iter().map(|c| c.trim().to_string()).collect(),
                    },
                );
                Ok(Vec::new())
            }
            Statement::DropIndex { keyspace, name } => {
                let collection = state.visible_collection_mut(keyspace, now)?;
                collection
                    .indexes
                    .remove(name)
                    .map(|_| Vec::new())
                    .ok_or_else(|| StoreError::IndexNotFound {
                        index: format!("{}.{}", keyspace.path(), name),
                    })
            }
            Statement::Select {
                keyspace,
                fields,
                order_by,
            } => {
                let collection = state.visible_collection(keyspace, now)?;
                if !collection.has_primary() {
                    return Err(StoreError::NoIndexAvailable {
                        keyspace: keyspace.path(),
                    });
                }
                let mut rows: Vec<Value> = collection
                    .documents
                    .iter()
                    .map(|(key, doc)| project(key, doc, fields))
                    .collect();
                rows.sort_by(|a, b| compare_rows(a, b, order_by));
                Ok(rows)
            }
        }
    }

    async fn create_collection(
        &self,
        bucket: &str,
        scope: &str,
        collection: &str,
    ) -> StoreResult<()> {
        let ready_at = self.ready_at();
        let mut state = self.lock();
        state.guard("create_collection")?;
        let scope_state = state.visible_scope_mut(bucket, scope, Instant::now())?;
        if scope_state.collections.contains_key(collection) {
            return Err(StoreError::CollectionExists {
                keyspace: Keyspace::new(bucket, scope, collection).path(),
            });
        }
        scope_state
            .collections
            .insert(collection.to_string(), CollectionState::new(ready_at));
        Ok(())
    }

    async fn drop_collection(&self, bucket: &str, scope: &str, collection: &str) -> StoreResult<()> {
        let gone_at = self.ready_at();
        let now = Instant::now();
        let mut state = self.lock();
        state.guard("drop_collection")?;
        let scope_state = state.visible_scope_mut(bucket, scope, now)?;
        let not_found = || StoreError::CollectionNotFound {
            keyspace: Keyspace::new(bucket, scope, collection).path(),
        };
        let live = matches!(
            scope_state.collections.get(collection),
            Some(c) if c.dropped_until.is_none()
        );
        if !live {
            return Err(not_found());
        }

        if gone_at <= now {
            scope_state.collections.remove(collection);
        } else if let Some(c) = scope_state.collections.get_mut(collection) {
            c.dropped_until = Some(gone_at);
            c.documents.clear();
            c.indexes.clear();
        }
        Ok(())
    }

    async fn collection_exists(
        &self,
        bucket: &str,
        scope: &str,
        collection: &str,
    ) -> StoreResult<bool> {
        let mut state = self.lock();
        state.guard("collection_exists")?;
        let now = Instant::now();
        // A drop that is still propagating keeps the collection listed
        Ok(state
            .scopes(bucket)?
            .get(scope)
            .filter(|s| s.visible_at <= now)
            .and_then(|s| s.collections.get(collection))
            .map(|c| c.visible_at <= now)
            .unwrap_or(false))
    }

    async fn create_scope(&self, bucket: &str, scope: &str) -> StoreResult<()> {
        let ready_at = self.ready_at();
        let mut state = self.lock();
        state.guard("create_scope")?;
        let scopes = state.scopes_mut(bucket)?;
        if scopes.contains_key(scope) {
            return Err(StoreError::ScopeExists {
                scope: scope.to_string(),
            });
        }
        scopes.insert(
            scope.to_string(),
            ScopeState {
                visible_at: ready_at,
                collections: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn drop_scope(&self, bucket: &str, scope: &str) -> StoreResult<()> {
        let mut state = self.lock();
        state.guard("drop_scope")?;
        state
            .scopes_mut(bucket)?
            .remove(scope)
            .map(|_| ())
            .ok_or_else(|| StoreError::ScopeNotFound {
                scope: scope.to_string(),
            })
    }

    async fn scope_exists(&self, bucket: &str, scope: &str) -> StoreResult<bool> {
        let mut state = self.lock();
        state.guard("scope_exists")?;
        let now = Instant::now();
        Ok(state
            .scopes(bucket)?
            .get(scope)
            .map(|s| s.visible_at <= now)
            .unwrap_or(false))
    }
}

/// Build a result row: the document key as `id` plus the requested fields.
fn project(key: &str, document: &Value, fields: &[String]) -> Value {
    let mut row = Map::new();
    row.insert("id".to_string(), Value::String(key.to_string()));
    for field in fields {
        if let Some(value) = document.get(field) {
            row.insert(field.clone(), value.clone());
        }
    }
    Value::Object(row)
}

fn compare_rows(a: &Value, b: &Value, order_by: &[SortKey]) -> Ordering {
    for key in order_by {
        let ord = collate(a.get(&key.field), b.get(&key.field));
        let ord = if key.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Query-language collation: missing < null < booleans < numbers < strings
/// < arrays < objects.
fn collate(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(Value::Array(_)) => 5,
            Some(Value::Object(_)) => 6,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn default_keyspace() -> Keyspace {
        Keyspace::new("app", "_default", "_default")
    }

    #[tokio::test]
    async fn test_open_bucket() {
        let cluster = InMemoryCluster::new().with_bucket("app");
        cluster.open_bucket("app").await.unwrap();

        let err = cluster.open_bucket("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::BucketNotFound { .. }));
    }

    #[tokio::test]
    async fn test_document_roundtrip() {
        let cluster = InMemoryCluster::new().with_bucket("app");
        let ks = default_keyspace();

        cluster.upsert(&ks, "k1", json!({ "v": 1 })).await.unwrap();
        assert_eq!(cluster.get(&ks, "k1").await.unwrap(), json!({ "v": 1 }));

        cluster.remove(&ks, "k1").await.unwrap();
        let err = cluster.get(&ks, "k1").await.unwrap_err();
        assert!(matches!(err, StoreError::DocumentNotFound { .. }));

        let err = cluster.remove(&ks, "k1").await.unwrap_err();
        assert!(matches!(err, StoreError::DocumentNotFound { .. }));
    }

    #[tokio::test]
    async fn test_collection_invisible_until_propagated() {
        let cluster = InMemoryCluster::new()
            .with_bucket("app")
            .with_propagation_delay(Duration::from_millis(50));
        let ks = Keyspace::new("app", "_default", "users");

        cluster.create_collection("app", "_default", "users").await.unwrap();
        assert!(cluster.has_collection(&ks));
        assert!(!cluster.collection_exists("app", "_default", "users").await.unwrap());

        let err = cluster.upsert(&ks, "k", json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::CollectionNotFound { .. }));

        // A racing creator sees the collection in the manifest already
        let err = cluster
            .create_collection("app", "_default", "users")
            .await
            .unwrap_err();
        assert!(err.is_already_exists());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cluster.collection_exists("app", "_default", "users").await.unwrap());
        cluster.upsert(&ks, "k", json!({})).await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_lingers_until_propagated() {
        let cluster = InMemoryCluster::new()
            .with_bucket("app")
            .with_propagation_delay(Duration::from_millis(50));
        let ks = Keyspace::new("app", "_default", "users");
        cluster.create_collection("app", "_default", "users").await.unwrap();
        tokio::time::sleep(Duration::from_millis(70)).await;
        cluster.upsert(&ks, "k", json!({})).await.unwrap();

        cluster.drop_collection("app", "_default", "users").await.unwrap();
        assert!(cluster.collection_exists("app", "_default", "users").await.unwrap());
        assert!(cluster.has_collection(&ks));
        assert!(cluster.upsert(&ks, "k", json!({})).await.is_err());
        assert!(cluster
            .create_collection("app", "_default", "users")
            .await
            .unwrap_err()
            .is_already_exists());
        let err = cluster
            .drop_collection("app", "_default", "users")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CollectionNotFound { .. }));

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(!cluster.collection_exists("app", "_default", "users").await.unwrap());
        assert!(!cluster.has_collection(&ks));
        cluster.create_collection("app", "_default", "users").await.unwrap();
    }

    #[tokio::test]
    async fn test_select_requires_primary_index() {
        let cluster = InMemoryCluster::new().with_bucket("app");
        let ks = default_keyspace();
        let select = Statement::Select {
            keyspace: ks.clone(),
            fields: vec!["name".to_string()],
            order_by: vec![],
        };

        let err = cluster.query(&select).await.unwrap_err();
        assert!(matches!(err, StoreError::NoIndexAvailable { .. }));

        cluster
            .query(&Statement::CreatePrimaryIndex { keyspace: ks.clone() })
            .await
            .unwrap();
        assert!(cluster.query(&select).await.unwrap().is_empty());

        let err = cluster
            .query(&Statement::CreatePrimaryIndex { keyspace: ks.clone() })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IndexExists { .. }));
        assert_eq!(cluster.primary_index_count(&ks), 1);
    }

    #[tokio::test]
    async fn test_select_ordering() {
        let cluster = InMemoryCluster::new().with_bucket("app");
        let ks = default_keyspace();
        cluster
            .query(&Statement::CreatePrimaryIndex { keyspace: ks.clone() })
            .await
            .unwrap();

        cluster.upsert(&ks, "a", json!({ "name": "a", "at": 1 })).await.unwrap();
        cluster.upsert(&ks, "b", json!({ "name": "b", "at": 1 })).await.unwrap();
        cluster.upsert(&ks, "c", json!({ "name": "c", "at": 2 })).await.unwrap();

        let rows = cluster
            .query(&Statement::Select {
                keyspace: ks,
                fields: vec!["name".to_string(), "at".to_string()],
                order_by: vec![SortKey::desc("at"), SortKey::desc("name")],
            })
            .await
            .unwrap();

        let ids: Vec<&str> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_secondary_index_lifecycle() {
        let cluster = InMemoryCluster::new().with_bucket("app");
        let ks = default_keyspace();
        let create = Statement::CreateIndex {
            name: "idx_email".to_string(),
            keyspace: ks.clone(),
            columns: vec!["email".to_string()],
        };
        let drop = Statement::DropIndex {
            keyspace: ks.clone(),
            name: "idx_email".to_string(),
        };

        cluster.query(&create).await.unwrap();
        assert_eq!(
            cluster.index_columns(&ks, "idx_email"),
            Some(vec!["email".to_string()])
        );
        assert!(cluster.query(&create).await.unwrap_err().is_already_exists());

        cluster.query(&drop).await.unwrap();
        let err = cluster.query(&drop).await.unwrap_err();
        assert!(matches!(err, StoreError::IndexNotFound { .. }));
    }

    #[tokio::test]
    async fn test_injected_fault_fires_once() {
        let cluster = InMemoryCluster::new().with_bucket("app");
        cluster.inject_fault(
            "create_collection",
            StoreError::Transport {
                reason: "connection reset".to_string(),
            },
        );

        let err = cluster
            .create_collection("app", "_default", "users")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Transport { .. }));
        cluster
            .create_collection("app", "_default", "users")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_twice_fails() {
        let cluster = InMemoryCluster::new().with_bucket("app");
        cluster.close().await.unwrap();
        assert!(cluster.is_closed());
        assert!(cluster.close().await.is_err());
        assert!(cluster.open_bucket("app").await.is_err());
    }

    #[tokio::test]
    async fn test_scope_lifecycle() {
        let cluster = InMemoryCluster::new().with_bucket("app");
        cluster.create_scope("app", "tenant").await.unwrap();
        assert!(cluster.scope_exists("app", "tenant").await.unwrap());
        assert!(cluster.create_scope("app", "tenant").await.unwrap_err().is_already_exists());

        cluster.drop_scope("app", "tenant").await.unwrap();
        assert!(!cluster.has_scope("app", "tenant"));
        let err = cluster.drop_scope("app", "tenant").await.unwrap_err();
        assert!(matches!(err, StoreError::ScopeNotFound { .. }));
    }
}
