//! Configuration Validation
//!
//! Validates driver configuration before any connection is attempted.
//! Every problem is collected so the operator sees them all at once.

/// Longest scope or collection name the cluster accepts
const MAX_NAME_LEN: usize = 251;

/// Name that may start with an underscore
const DEFAULT_NAME: &str = "_default";

/// A single configuration problem
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub value: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Invalid configuration for '{}': {} (value: {})",
            self.field, self.message, self.value
        )
    }
}

impl std::error::Error for ConfigValidationError {}

/// Result of config validation
pub type ConfigResult<T> = Result<T, Vec<ConfigValidationError>>;

/// Configuration validator
pub struct ConfigValidator {
    errors: Vec<ConfigValidationError>,
}

impl ConfigValidator {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    fn error(&mut self, field: &str, value: impl std::fmt::Display, message: &str) {
        self.errors.push(ConfigValidationError {
            field: field.to_string(),
            value: value.to_string(),
            message: message.to_string(),
        });
    }

    /// Validate a required option is present and not blank
    pub fn validate_required(&mut self, field: &str, value: Option<&str>) -> &mut Self {
        match value {
            None => self.error(field, "<missing>", "Configuration must specify this option"),
            Some(v) if v.trim().is_empty() => self.error(field, v, "Value cannot be empty"),
            Some(_) => {}
        }
        self
    }

    /// Validate a scope or collection name against the cluster's naming rules
    pub fn validate_namespace_name(&mut self, field: &str, value: &str) -> &mut Self {
        if value == DEFAULT_NAME {
            return self;
        }
        if value.is_empty() || value.len() > MAX_NAME_LEN {
            self.error(
                field,
                value,
                &format!("Name must be between 1 and {} characters", MAX_NAME_LEN),
            );
        } else if value.starts_with('_') || value.starts_with('%') {
            self.error(field, value, "Name cannot start with '_' or '%'");
        } else if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '%'))
        {
            self.error(
                field,
                value,
                "Name may only contain letters, digits, '_', '-' and '%'",
            );
        }
        self
    }

    /// Validate duration in milliseconds
    pub fn validate_duration_ms(&mut self, field: &str, ms: u64, min_ms: u64, max_ms: u64) -> &mut Self {
        if ms < min_ms || ms > max_ms {
            self.error(
                field,
                format!("{}ms", ms),
                &format!("Duration must be between {}ms and {}ms", min_ms, max_ms),
            );
        }
        self
    }

    /// Validate that one duration does not exceed another
    pub fn validate_not_longer(&mut self, field: &str, ms: u64, other_field: &str, other_ms: u64) -> &mut Self {
        if ms > other_ms {
            self.error(
                field,
                format!("{}ms", ms),
                &format!("Must not exceed {} ({}ms)", other_field, other_ms),
            );
        }
        self
    }

    /// Finish validation and return result
    pub fn finish(&mut self) -> ConfigResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Format validation errors for display
pub fn format_validation_errors(errors: &[ConfigValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_validation() {
        let mut v = ConfigValidator::new();
        v.validate_required("bucket", Some("app"));
        assert!(v.finish().is_ok());

        let mut v = ConfigValidator::new();
        v.validate_required("bucket", None);
        let errors = v.finish().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("bucket"));

        let mut v = ConfigValidator::new();
        v.validate_required("bucket", Some("  "));
        assert!(v.finish().is_err());
    }

    #[test]
    fn test_namespace_name_validation() {
        let mut v = ConfigValidator::new();
        v.validate_namespace_name("scope", "_default")
            .validate_namespace_name("collection", "migrations")
            .validate_namespace_name("collection", "audit-log%2");
        assert!(v.finish().is_ok());

        let mut v = ConfigValidator::new();
        v.validate_namespace_name("scope", "_private")
            .validate_namespace_name("collection", "")
            .validate_namespace_name("collection", "has space");
        assert_eq!(v.finish().unwrap_err().len(), 3);
    }

    #[test]
    fn test_duration_validation() {
        let mut v = ConfigValidator::new();
        v.validate_duration_ms("settle_interval_ms", 250, 1, 60_000);
        assert!(v.finish().is_ok());

        let mut v = ConfigValidator::new();
        v.validate_duration_ms("settle_interval_ms", 0, 1, 60_000);
        let err = v.finish().unwrap_err();
        assert!(err[0].message.contains("between"));
    }

    #[test]
    fn test_multiple_errors_formatted() {
        let mut v = ConfigValidator::new();
        v.validate_required("bucket", None)
            .validate_namespace_name("scope", "")
            .validate_not_longer("settle_interval_ms", 5_000, "settle_timeout_ms", 1_000);

        let errors = v.finish().unwrap_err();
        assert_eq!(errors.len(), 3);
        let text = format_validation_errors(&errors);
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("settle_timeout_ms"));
    }
}
