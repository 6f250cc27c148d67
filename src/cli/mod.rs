//! # Command-Line Tool
//!
//! `cbmigrate` drives the migration hooks by hand: inspect the ledger, mark or
//! unmark migrations, and run one-off schema changes.

pub mod args;
pub mod commands;
pub mod io;

pub use args::Cli;
pub use commands::{execute, run};
