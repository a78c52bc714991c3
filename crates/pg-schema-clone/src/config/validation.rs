//! Configuration validation.

use super::{CloneConfig, Config, LockMode};
use crate::core::identifier::{validate_identifier, validate_namespace_name};
use crate::error::{CloneError, Result};

const SSL_MODES: &[&str] = &["disable", "require", "verify-ca", "verify-full"];

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let db = &config.database;
    if db.host.is_empty() {
        return Err(CloneError::Config("database.host is required".into()));
    }
    if db.database.is_empty() {
        return Err(CloneError::Config("database.database is required".into()));
    }
    if db.user.is_empty() {
        return Err(CloneError::Config("database.user is required".into()));
    }
    if !SSL_MODES.contains(&db.ssl_mode.to_lowercase().as_str()) {
        return Err(CloneError::Config(format!(
            "database.ssl_mode must be one of {}, got '{}'",
            SSL_MODES.join(", "),
            db.ssl_mode
        )));
    }

    // The advisory lock pins one connection for the whole clone.
    let min_conns = if config.clone.lock_mode == LockMode::Disabled {
        1
    } else {
        2
    };
    if let Some(n) = db.max_connections {
        if n < min_conns {
            return Err(CloneError::Config(format!(
                "database.max_connections must be at least {} with lock_mode {:?}",
                min_conns, config.clone.lock_mode
            )));
        }
    }

    validate_clone(&config.clone)
}

/// Validate the clone section on its own.
pub fn validate_clone(clone: &CloneConfig) -> Result<()> {
    validate_namespace_name(&clone.source_schema)
        .map_err(|e| CloneError::Config(format!("clone.source_schema: {}", e)))?;

    if let Some(0) = clone.statement_timeout_secs {
        return Err(CloneError::Config(
            "clone.statement_timeout_secs must be at least 1".into(),
        ));
    }

    let trigger = &clone.timestamp_trigger;
    if trigger.enabled {
        for (field, value) in [
            ("function_schema", &trigger.function_schema),
            ("function_name", &trigger.function_name),
            ("trigger_name", &trigger.trigger_name),
            ("column", &trigger.column),
        ] {
            validate_identifier(value).map_err(|e| {
                CloneError::Config(format!("clone.timestamp_trigger.{}: {}", field, e))
            })?;
        }
    }

    Ok(())
}
