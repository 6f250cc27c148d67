//! # Statement Dialect
//!
//! Typed statements for the cluster's SQL-like query language. Backends
//! receive a [`Statement`] rather than raw text; the text form is produced by
//! its `Display` impl with every identifier backtick-quoted.

use std::fmt;

use super::errors::{StoreError, StoreResult};
use super::Keyspace;

/// Name given to every primary index this driver creates
pub const PRIMARY_INDEX_NAME: &str = "#primary";

/// A sort key for ordered retrieval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// A statement understood by every backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Primary index scoped to one collection
    CreatePrimaryIndex { keyspace: Keyspace },

    /// Secondary index over an ordered column list
    CreateIndex {
        name: String,
        keyspace: Keyspace,
        columns: Vec<String>,
    },

    /// Drop a named index
    DropIndex { keyspace: Keyspace, name: String },

    /// Ordered retrieval. Each row carries the document key as `id` plus the
    /// requested top-level fields.
    Select {
        keyspace: Keyspace,
        fields: Vec<String>,
        order_by: Vec<SortKey>,
    },
}

impl Statement {
    /// The keyspace the statement targets
    pub fn keyspace(&self) -> &Keyspace {
        match self {
            Self::CreatePrimaryIndex { keyspace }
            | Self::CreateIndex { keyspace, .. }
            | Self::DropIndex { keyspace, .. }
            | Self::Select { keyspace, .. } => keyspace,
        }
    }

    /// The index the statement creates or drops, if any
    pub fn index_name(&self) -> Option<&str> {
        match self {
            Self::CreatePrimaryIndex { .. } => Some(PRIMARY_INDEX_NAME),
            Self::CreateIndex { name, .. } | Self::DropIndex { name, .. } => Some(name),
            Self::Select { .. } => None,
        }
    }

    /// Short label used in logs and error context
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreatePrimaryIndex { .. } => "create_primary_index",
            Self::CreateIndex { .. } => "create_index",
            Self::DropIndex { .. } => "drop_index",
            Self::Select { .. } => "select",
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreatePrimaryIndex { keyspace } => write!(
                f,
                "CREATE PRIMARY INDEX {} ON {}",
                quote_identifier(PRIMARY_INDEX_NAME),
                keyspace
            ),
            Self::CreateIndex {
                name,
                keyspace,
                columns,
            } => write!(
                f,
                "CREATE INDEX {} ON {}({})",
                quote_identifier(name),
                keyspace,
                columns.join(", ")
            ),
            Self::DropIndex { keyspace, name } => {
                write!(f, "DROP INDEX {}.{}", keyspace, quote_identifier(name))
            }
            Self::Select {
                keyspace,
                fields,
                order_by,
            } => {
                write!(f, "SELECT META().id AS id")?;
                for field in fields {
                    write!(f, ", {}", quote_identifier(field))?;
                }
                write!(f, " FROM {}", keyspace)?;
                if !order_by.is_empty() {
                    let keys: Vec<String> = order_by
                        .iter()
                        .map(|k| {
                            format!(
                                "{} {}",
                                quote_identifier(&k.field),
                                if k.descending { "DESC" } else { "ASC" }
                            )
                        })
                        .collect();
                    write!(f, " ORDER BY {}", keys.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

/// Backtick-quote an identifier, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Reject index names the query service would refuse.
pub fn validate_index_name(name: &str) -> StoreResult<()> {
    if name.is_empty() {
        return Err(StoreError::MalformedStatement {
            reason: "index name cannot be empty".to_string(),
        });
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '#' | '-')))
    {
        return Err(StoreError::MalformedStatement {
            reason: format!("index name '{}' contains invalid character '{}'", name, bad),
        });
    }
    Ok(())
}

/// Reject column references that cannot form a valid index key list.
pub fn validate_index_columns(columns: &[String]) -> StoreResult<()> {
    if columns.is_empty() {
        return Err(StoreError::MalformedStatement {
            reason: "index requires at least one column".to_string(),
        });
    }

    for column in columns {
        let trimmed = column.trim();
        if trimmed.is_empty() {
            return Err(StoreError::MalformedStatement {
                reason: "column reference cannot be empty".to_string(),
            });
        }
        if trimmed.contains(';') {
            return Err(StoreError::MalformedStatement {
                reason: format!("column reference '{}' contains a statement separator", column),
            });
        }
        if trimmed.matches('`').count() % 2 != 0 {
            return Err(StoreError::MalformedStatement {
                reason: format!("column reference '{}' has an unterminated identifier", column),
            });
        }

        let mut depth: i32 = 0;
        for c in trimmed.chars() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                break;
            }
        }
        if depth != 0 {
            return Err(StoreError::MalformedStatement {
                reason: format!("column reference '{}' has unbalanced parentheses", column),
            });
        }
    }

    Ok(())
}
