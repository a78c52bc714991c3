//! Configuration type definitions.

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database connection shared by source and target schemas.
    pub database: DatabaseConfig,

    /// Clone behavior configuration.
    #[serde(default)]
    pub clone: CloneConfig,
}

/// Database (PostgreSQL) connection configuration.
///
/// Source and target schemas always live in this same database.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,

    /// Maximum pooled connections (default: 4).
    ///
    /// A clone uses at most two at a time: one for the advisory lock and one
    /// for the running phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl DatabaseConfig {
    pub fn get_max_connections(&self) -> usize {
        self.max_connections.unwrap_or(4)
    }
}

/// Clone behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneConfig {
    /// Template schema cloned when a request does not name one.
    #[serde(default = "default_source_schema")]
    pub source_schema: String,

    /// How the per-target advisory lock is taken (default: try).
    #[serde(default)]
    pub lock_mode: LockMode,

    /// Server-side statement timeout applied inside every phase transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_timeout_secs: Option<u64>,

    /// Update-timestamp trigger attached to every created table.
    #[serde(default)]
    pub timestamp_trigger: TimestampTriggerConfig,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            source_schema: default_source_schema(),
            lock_mode: LockMode::default(),
            statement_timeout_secs: None,
            timestamp_trigger: TimestampTriggerConfig::default(),
        }
    }
}

/// Advisory lock behavior for the target schema name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Fail immediately if another clone holds the lock.
    #[default]
    Try,

    /// Block until the lock is released.
    Wait,

    /// Do not lock. The caller serializes clones per target itself.
    Disabled,
}

/// Shared "set modified timestamp on update" trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampTriggerConfig {
    /// Attach the trigger to created tables (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Schema holding the shared trigger function (default: "public").
    #[serde(default = "default_public_schema")]
    pub function_schema: String,

    /// Trigger function name (default: "update_modified_column").
    #[serde(default = "default_function_name")]
    pub function_name: String,

    /// Create the function when it is missing (default: true).
    #[serde(default = "default_true")]
    pub create_function: bool,

    /// Trigger name on each table (default: "update_modified_time").
    #[serde(default = "default_trigger_name")]
    pub trigger_name: String,

    /// Timestamp column set by the trigger (default: "modified").
    /// Tables without this column get no trigger.
    #[serde(default = "default_timestamp_column")]
    pub column: String,
}

impl Default for TimestampTriggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            function_schema: default_public_schema(),
            function_name: default_function_name(),
            create_function: true,
            trigger_name: default_trigger_name(),
            column: default_timestamp_column(),
        }
    }
}

// Default value functions for serde
fn default_pg_port() -> u16 {
    5432
}

fn default_require() -> String {
    "require".to_string()
}

fn default_source_schema() -> String {
    "template".to_string()
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_function_name() -> String {
    "update_modified_column".to_string()
}

fn default_trigger_name() -> String {
    "update_modified_time".to_string()
}

fn default_timestamp_column() -> String {
    "modified".to_string()
}

fn default_true() -> bool {
    true
}
