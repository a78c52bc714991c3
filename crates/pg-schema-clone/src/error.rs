//! Error types for the schema clone library.

use thiserror::Error;

/// Main error type for clone operations.
///
/// Only fatal conditions are represented here. Failures of individual objects
/// in best-effort phases are recorded in the [`CloneReport`](crate::CloneReport)
/// instead of being returned.
#[derive(Error, Debug)]
pub enum CloneError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The clone request itself is unusable (bad or identical namespace names).
    #[error("Invalid clone request: {0}")]
    InvalidRequest(String),

    /// A statement could not be executed (connection lost, server error).
    #[error("Database error: {0}")]
    Connectivity(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Catalog introspection query failed
    #[error("Catalog query failed ({what}): {source}")]
    Catalog {
        what: String,
        #[source]
        source: tokio_postgres::Error,
    },

    /// The structure transaction failed and was rolled back.
    #[error("Structure creation failed at {object}; all structure changes rolled back: {source}")]
    Structure {
        object: String,
        #[source]
        source: tokio_postgres::Error,
    },

    /// Another clone currently holds the advisory lock for this target.
    #[error("Target schema '{0}' is locked by another clone operation")]
    NamespaceLocked(String),

    /// The caller cancelled the operation.
    #[error("Clone cancelled")]
    Cancelled,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Process exit code for configuration and request errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Process exit code for connectivity and catalog errors.
pub const EXIT_CONNECTIVITY_ERROR: u8 = 2;
/// Process exit code for a rolled-back structure transaction.
pub const EXIT_STRUCTURE_ERROR: u8 = 3;
/// Process exit code when the target is locked by another clone.
pub const EXIT_LOCKED: u8 = 4;
/// Process exit code after cancellation.
pub const EXIT_CANCELLED: u8 = 5;
/// Process exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

impl CloneError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        CloneError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Catalog error naming the failed lookup.
    pub fn catalog(what: impl Into<String>, source: tokio_postgres::Error) -> Self {
        CloneError::Catalog {
            what: what.into(),
            source,
        }
    }

    /// Create a Structure error naming the object being built.
    pub fn structure(object: impl Into<String>, source: tokio_postgres::Error) -> Self {
        CloneError::Structure {
            object: object.into(),
            source,
        }
    }

    /// Whether this error must abort the whole clone even inside a
    /// best-effort phase.
    pub fn is_abort(&self) -> bool {
        matches!(self, CloneError::Cancelled)
    }

    /// Exit code used by the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            CloneError::Config(_)
            | CloneError::InvalidRequest(_)
            | CloneError::Yaml(_)
            | CloneError::Json(_) => EXIT_CONFIG_ERROR,
            CloneError::Connectivity(_) | CloneError::Pool { .. } | CloneError::Catalog { .. } => {
                EXIT_CONNECTIVITY_ERROR
            }
            CloneError::Structure { .. } => EXIT_STRUCTURE_ERROR,
            CloneError::NamespaceLocked(_) => EXIT_LOCKED,
            CloneError::Cancelled => EXIT_CANCELLED,
            CloneError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// One-line message followed by its causes. Server errors surface here:
    /// a `tokio_postgres::Error` displays only `db error` and keeps the
    /// server's text in its source. Causes already quoted by the message
    /// before them are not repeated.
    pub fn full_message(&self) -> String {
        let mut message = self.to_string();

        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            let text = err.to_string();
            if !message.contains(&text) {
                message.push_str(": ");
                message.push_str(&text);
            }
            source = err.source();
        }

        message
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for clone operations.
pub type Result<T> = std::result::Result<T, CloneError>;
