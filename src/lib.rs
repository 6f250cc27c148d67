//! cbmigrate - migration state driver for Couchbase clusters
//!
//! Records which schema migrations have been applied, provisions the tracking
//! collection on first use, and runs the scope, collection and index changes
//! migration scripts ask for.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod driver;

pub use cluster::{ClusterBackend, InMemoryCluster, Keyspace, RestCluster, StoreError};
pub use config::DriverConfig;
pub use driver::{CouchbaseDriver, DriverError, DriverResult, MigrationDriver, MigrationRecord};
