//! # Migration Driver
//!
//! Tracks applied migrations in a Couchbase collection and exposes the schema
//! operations migration scripts use.
//!
//! # Components
//!
//! - [`connection`]: owns the cluster connection and resolved bucket
//! - [`provisioner`]: makes the tracking collection exist, using a write probe
//! - [`ledger`]: records, removes and lists applied migrations
//! - [`schema`]: scope, collection and index changes
//! - [`lifecycle`]: the orchestrator-facing hook set
//! - [`settle`]: bounded waits for metadata propagation
//!
//! # Usage
//!
//! ```no_run
//! # async fn demo() -> cbmigrate::driver::DriverResult<()> {
//! use cbmigrate::config::DriverConfig;
//! use cbmigrate::driver::{CouchbaseDriver, MigrationDriver};
//!
//! let config = DriverConfig::for_bucket("app");
//! let mut driver = CouchbaseDriver::connect(&config).await?;
//! driver.create_migrations_table().await?;
//! driver.add_migration_record("20240101_init").await?;
//! for record in driver.all_loaded_migrations().await? {
//!     println!("{} applied at {}", record.name, record.applied_at);
//! }
//! driver.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod errors;
pub mod ledger;
pub mod lifecycle;
pub mod provisioner;
pub mod schema;
pub mod settle;

pub use connection::Connection;
pub use errors::{DriverError, DriverResult};
pub use ledger::{normalize_migration_id, MigrationLedger, MigrationRecord, MonotonicClock};
pub use lifecycle::{CouchbaseDriver, MigrationDriver};
pub use provisioner::{NamespaceProvisioner, ProbeResult, ProvisionOutcome};
pub use schema::SchemaOperations;
pub use settle::SettlePolicy;
