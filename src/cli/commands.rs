//! CLI command implementations
//!
//! Each invocation opens one driver, runs one command and closes the driver,
//! even when the command fails.

use serde_json::{json, Value};
use tracing::debug;

use super::args::{Cli, CollectionAction, Command, IndexAction, ScopeAction};
use crate::config::DriverConfig;
use crate::driver::{CouchbaseDriver, DriverResult, MigrationDriver};

/// Main CLI entry point: load config, connect, run the command.
pub async fn run(cli: Cli) -> DriverResult<Value> {
    let config = DriverConfig::load(&cli.config, cli.env.as_deref())?;
    debug!(config = %cli.config.display(), env = ?cli.env, "loaded configuration");

    let mut driver = CouchbaseDriver::connect(&config).await?;
    let result = execute(&driver, cli.command).await;
    let closed = driver.close().await;

    let value = result?;
    closed?;
    Ok(value)
}

/// Run one command against an open driver.
///
/// Ledger commands provision the tracking collection first, the same way a
/// migration run does.
pub async fn execute(driver: &dyn MigrationDriver, command: Command) -> DriverResult<Value> {
    match command {
        Command::Status => {
            driver.create_migrations_table().await?;
            let migrations = driver.all_loaded_migrations().await?;
            Ok(json!({ "migrations": migrations }))
        }

        Command::Provision => {
            let outcome = driver.create_migrations_table().await?;
            Ok(json!({ "outcome": outcome }))
        }

        Command::Record { name } => {
            driver.create_migrations_table().await?;
            let record = driver.add_migration_record(&name).await?;
            Ok(json!({ "recorded": record }))
        }

        Command::Forget { name } => {
            driver.create_migrations_table().await?;
            let removed = driver.delete_migration(&name).await?;
            Ok(json!({ "name": name, "removed": removed }))
        }

        Command::Collection { action } => match action {
            CollectionAction::Create { name, scope } => {
                driver.create_collection(&name, scope.as_deref()).await?;
                Ok(json!({ "created": true, "collection": name, "scope": scope }))
            }
            CollectionAction::Drop { name, scope } => {
                driver.drop_collection(&name, scope.as_deref()).await?;
                Ok(json!({ "dropped": true, "collection": name, "scope": scope }))
            }
        },

        Command::Index { action } => match action {
            IndexAction::Add {
                collection,
                name,
                columns,
                scope,
            } => {
                driver
                    .add_index(&collection, &name, &columns, scope.as_deref())
                    .await?;
                Ok(json!({
                    "created": true,
                    "collection": collection,
                    "index": name,
                    "columns": columns,
                }))
            }
            IndexAction::Remove {
                collection,
                name,
                scope,
            } => {
                driver
                    .remove_index(&collection, &name, scope.as_deref())
                    .await?;
                Ok(json!({ "dropped": true, "collection": collection, "index": name }))
            }
        },

        Command::Scope { action } => match action {
            ScopeAction::Create { name } => {
                driver.create_scope(&name).await?;
                Ok(json!({ "created": true, "scope": name }))
            }
            ScopeAction::Drop { name } => {
                driver.drop_scope(&name).await?;
                Ok(json!({ "dropped": true, "scope": name }))
            }
        },
    }
}
