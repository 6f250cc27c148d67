//! # Migration Ledger
//!
//! Persists which migrations have been applied. Each applied migration is one
//! document in the tracking collection, keyed by its normalized id:
//!
//! ```json
//! { "name": "20240101_init", "run_on": "2024-01-01T10:00:00.000Z" }
//! ```
//!
//! Records are upserted, so re-applying a migration overwrites its stamp
//! instead of duplicating it. Removing a record that was never written is a
//! no-op. Listing is always ordered by `run_on` descending, then `name`
//! descending, which is the order migrations are rolled back in.
//!
//! The ledger never provisions; the tracking namespace must exist first.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use super::connection::Connection;
use super::errors::{DriverError, DriverResult};
use super::provisioner::is_sentinel_key;
use crate::cluster::{SortKey, Statement, StoreError};

/// One applied migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "run_on", serialize_with = "serialize_run_on")]
    pub applied_at: DateTime<Utc>,
}

/// Document body as stored in the tracking collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub name: String,
    pub run_on: String,
}

fn serialize_run_on<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_run_on(at))
}

/// RFC 3339, UTC, millisecond precision, `Z` suffix
pub fn format_run_on(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_run_on(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Strip path separators from a migration id.
pub fn normalize_migration_id(migration_id: &str) -> String {
    migration_id.chars().filter(|c| !matches!(c, '/' | '\\')).collect()
}

/// Millisecond clock that never repeats or goes backwards within a driver.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.advance(Utc::now())
    }

    fn advance(&self, candidate: DateTime<Utc>) -> DateTime<Utc> {
        let candidate = candidate.trunc_subsecs(3);
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let stamp = match *last {
            Some(prev) if candidate <= prev => prev + chrono::Duration::milliseconds(1),
            _ => candidate,
        };
        *last = Some(stamp);
        stamp
    }
}

/// Ledger operations over a provisioned tracking collection
pub struct MigrationLedger<'a> {
    conn: &'a Connection,
    clock: &'a MonotonicClock,
}

impl<'a> MigrationLedger<'a> {
    pub fn new(conn: &'a Connection, clock: &'a MonotonicClock) -> Self {
        Self { conn, clock }
    }

    /// Upsert the record for `migration_id` stamped with the current time.
    pub async fn record(&self, migration_id: &str) -> DriverResult<MigrationRecord> {
        let keyspace = self.conn.tracking_keyspace();
        let id = normalize_migration_id(migration_id);
        let applied_at = self.clock.now();
        let stored = StoredRecord {
            name: id.clone(),
            run_on: format_run_on(&applied_at),
        };

        let body = serde_json::to_value(&stored).map_err(|e| DriverError::Store {
            operation: "record_migration",
            target: keyspace.path(),
            source: StoreError::Protocol {
                reason: e.to_string(),
            },
        })?;

        self.conn
            .cluster()
            .upsert(&keyspace, &id, body)
            .await
            .map_err(|source| DriverError::Store {
                operation: "record_migration",
                target: keyspace.path(),
                source,
            })?;

        debug!(id = %id, run_on = %stored.run_on, "recorded migration");
        Ok(MigrationRecord {
            name: id.clone(),
            id,
            applied_at,
        })
    }

    /// Remove the record for `migration_id`.
    ///
    /// Returns whether a record was removed. A missing record is not an error.
    pub async fn unrecord(&self, migration_id: &str) -> DriverResult<bool> {
        let keyspace = self.conn.tracking_keyspace();
        let id = normalize_migration_id(migration_id);
        let cluster = self.conn.cluster();
        let wrap = |source: StoreError| DriverError::Store {
            operation: "delete_migration",
            target: keyspace.path(),
            source,
        };

        match cluster.get(&keyspace, &id).await {
            Ok(_) => {}
            Err(StoreError::DocumentNotFound { .. }) => {
                debug!(id = %id, "migration was never recorded");
                return Ok(false);
            }
            Err(source) => return Err(wrap(source)),
        }

        match cluster.remove(&keyspace, &id).await {
            Ok(()) => {
                debug!(id = %id, "removed migration record");
                Ok(true)
            }
            // Removed between lookup and delete
            Err(StoreError::DocumentNotFound { .. }) => Ok(false),
            Err(source) => Err(wrap(source)),
        }
    }

    /// All records, most recently applied first.
    ///
    /// Write-probe sentinels share the collection and are skipped.
    pub async fn list(&self) -> DriverResult<Vec<MigrationRecord>> {
        let keyspace = self.conn.tracking_keyspace();
        let statement = Statement::Select {
            keyspace: keyspace.clone(),
            fields: vec!["name".to_string(), "run_on".to_string()],
            order_by: vec![SortKey::desc("run_on"), SortKey::desc("name")],
        };

        let rows = self
            .conn
            .cluster()
            .query(&statement)
            .await
            .map_err(|source| DriverError::Store {
                operation: "list_migrations",
                target: keyspace.path(),
                source,
            })?;

        rows.iter()
            .filter(|row| !row.get("id").and_then(Value::as_str).is_some_and(is_sentinel_key))
            .map(decode_row)
            .collect()
    }
}

fn decode_row(row: &Value) -> DriverResult<MigrationRecord> {
    let id = row
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| DriverError::CorruptRecord {
            id: "<unknown>".to_string(),
            reason: "row has no document id".to_string(),
        })?;
    let corrupt = |reason: &str| DriverError::CorruptRecord {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    let name = row
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| corrupt("missing or non-string name"))?;
    let run_on = row
        .get("run_on")
        .and_then(Value::as_str)
        .ok_or_else(|| corrupt("missing or non-string run_on"))?;
    let applied_at = parse_run_on(run_on).ok_or_else(|| corrupt("run_on is not an RFC 3339 timestamp"))?;

    Ok(MigrationRecord {
        id: id.to_string(),
        name: name.to_string(),
        applied_at,
    })
}
