//! CLI argument definitions using clap
//!
//! Commands:
//! - cbmigrate status
//! - cbmigrate provision
//! - cbmigrate record <name> / forget <name>
//! - cbmigrate collection <create|drop> <name> [--scope]
//! - cbmigrate index add <collection> <name> --columns a,b [--scope]
//! - cbmigrate index remove <collection> <name> [--scope]
//! - cbmigrate scope <create|drop> <name>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Couchbase migration state driver
#[derive(Parser, Debug)]
#[command(name = "cbmigrate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./database.json")]
    pub config: PathBuf,

    /// Named environment inside the configuration file
    #[arg(long, global = true)]
    pub env: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// List applied migrations, most recent first
    Status,

    /// Create the tracking collection and its primary index if missing
    Provision,

    /// Mark a migration as applied
    Record {
        /// Migration name
        name: String,
    },

    /// Remove a migration's applied mark
    Forget {
        /// Migration name
        name: String,
    },

    /// Collection management
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Secondary index management
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Scope management
    Scope {
        #[command(subcommand)]
        action: ScopeAction,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum CollectionAction {
    /// Create a collection with a primary index
    Create {
        name: String,

        /// Scope; defaults to the configured scope
        #[arg(long)]
        scope: Option<String>,
    },

    /// Drop a collection
    Drop {
        name: String,

        #[arg(long)]
        scope: Option<String>,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum IndexAction {
    /// Create a secondary index
    Add {
        collection: String,
        name: String,

        /// Comma-separated index keys, in order
        #[arg(long, value_delimiter = ',', required = true)]
        columns: Vec<String>,

        #[arg(long)]
        scope: Option<String>,
    },

    /// Drop a secondary index
    Remove {
        collection: String,
        name: String,

        #[arg(long)]
        scope: Option<String>,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ScopeAction {
    Create { name: String },
    Drop { name: String },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
