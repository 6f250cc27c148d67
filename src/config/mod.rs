//! # Driver Configuration
//!
//! Options recognised by the driver, loaded from a JSON (`database.json`
//! style) or TOML file. A file may hold one configuration or several named
//! environments:
//!
//! ```json
//! {
//!   "dev":  { "host": "couchbase://localhost", "bucket": "app" },
//!   "prod": { "host": "couchbases://db.internal", "bucket": "app", "scope": "core" }
//! }
//! ```
//!
//! Unknown keys (such as the orchestrator's own `driver` key) are ignored.

pub mod validator;

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::driver::errors::{DriverError, DriverResult};
use crate::driver::settle::SettlePolicy;
use validator::{format_validation_errors, ConfigValidator};

/// Scope holding the tracking collection unless configured otherwise
pub const DEFAULT_SCOPE: &str = "_default";

/// Tracking collection name unless configured otherwise
pub const DEFAULT_COLLECTION: &str = "migrations";

/// Environment variable consulted when `host` is not configured
pub const HOST_ENV_VAR: &str = "HOST";

/// Driver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Cluster address, falls back to `$HOST`
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default, alias = "user")]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Bucket holding all migration state (required)
    #[serde(default)]
    pub bucket: Option<String>,

    #[serde(default = "default_scope")]
    pub scope: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    /// Poll interval while waiting for metadata to propagate
    #[serde(default = "default_settle_interval_ms")]
    pub settle_interval_ms: u64,

    /// Longest wait for metadata to propagate
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64,

    /// Deadline for each driver operation; `null` disables it
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: Option<u64>,
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}
fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}
fn default_settle_interval_ms() -> u64 {
    250
}
fn default_settle_timeout_ms() -> u64 {
    30_000
}
fn default_operation_timeout_ms() -> Option<u64> {
    Some(120_000)
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            host: None,
            username: None,
            password: None,
            bucket: None,
            scope: default_scope(),
            collection: default_collection(),
            settle_interval_ms: default_settle_interval_ms(),
            settle_timeout_ms: default_settle_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

impl DriverConfig {
    /// Configuration for `bucket` with every other option defaulted
    pub fn for_bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket: Some(bucket.into()),
            ..Default::default()
        }
    }

    /// Load from a JSON or TOML file, optionally selecting a named environment.
    pub fn load(path: &Path, environment: Option<&str>) -> DriverResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            DriverError::configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let is_toml = path
            .extension()
            .map(|e| e == "toml")
            .unwrap_or(false);
        let document: Value = if is_toml {
            toml::from_str(&content).map_err(|e| {
                DriverError::configuration(format!("Failed to parse {}: {}", path.display(), e))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                DriverError::configuration(format!("Failed to parse {}: {}", path.display(), e))
            })?
        };

        Self::from_document(document, environment)
    }

    /// Build from an already-parsed document.
    pub fn from_document(document: Value, environment: Option<&str>) -> DriverResult<Self> {
        let section = match environment {
            Some(env) => match document.get(env) {
                Some(section @ Value::Object(_)) => section.clone(),
                _ => {
                    return Err(DriverError::configuration(format!(
                        "Environment '{}' not found in configuration",
                        env
                    )))
                }
            },
            None => document,
        };

        serde_json::from_value(section)
            .map_err(|e| DriverError::configuration(format!("Invalid configuration: {}", e)))
    }

    /// Check every option; all problems are reported together.
    pub fn validate(&self) -> DriverResult<()> {
        let mut v = ConfigValidator::new();
        v.validate_required("bucket", self.bucket.as_deref())
            .validate_namespace_name("scope", &self.scope)
            .validate_namespace_name("collection", &self.collection)
            .validate_duration_ms("settle_interval_ms", self.settle_interval_ms, 1, 60_000)
            .validate_duration_ms("settle_timeout_ms", self.settle_timeout_ms, 1, 3_600_000)
            .validate_not_longer(
                "settle_interval_ms",
                self.settle_interval_ms,
                "settle_timeout_ms",
                self.settle_timeout_ms,
            );
        if let Some(ms) = self.operation_timeout_ms {
            v.validate_duration_ms("operation_timeout_ms", ms, 1, 86_400_000);
        }

        v.finish().map_err(|errors| {
            DriverError::configuration(format!(
                "Configuration must be corrected:\n{}",
                format_validation_errors(&errors)
            ))
        })
    }

    /// Bucket name, or `ConfigurationError` if absent
    pub fn bucket_name(&self) -> DriverResult<&str> {
        self.bucket
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| DriverError::configuration("Configuration must specify bucket"))
    }

    /// Cluster address from the config or `$HOST`
    pub fn resolved_host(&self) -> DriverResult<String> {
        self.resolve_host_with(|name| std::env::var(name).ok())
    }

    /// Cluster address using `lookup` for the environment fallback
    pub fn resolve_host_with(
        &self,
        lookup: impl FnOnce(&str) -> Option<String>,
    ) -> DriverResult<String> {
        self.host
            .clone()
            .or_else(|| lookup(HOST_ENV_VAR))
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| {
                DriverError::configuration(format!(
                    "Configuration must specify host or set ${}",
                    HOST_ENV_VAR
                ))
            })
    }

    pub fn settle_policy(&self) -> SettlePolicy {
        SettlePolicy {
            interval: Duration::from_millis(self.settle_interval_ms),
            timeout: Duration::from_millis(self.settle_timeout_ms),
        }
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }
}
