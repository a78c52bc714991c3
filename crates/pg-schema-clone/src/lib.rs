//! # pg-schema-clone
//!
//! Provision a tenant's private PostgreSQL schema by cloning a template
//! schema inside the same database.
//!
//! A clone runs five phases against live catalog introspection:
//!
//! - **Structure**: schema, sequences (positions preserved), tables with
//!   primary keys, unique/check constraints and the update-timestamp trigger,
//!   in one all-or-nothing transaction
//! - **Data**: server-side `INSERT ... SELECT` per table, one savepoint each
//! - **Foreign keys** and **indexes**, best effort
//! - **Views**, with schema qualifiers rewritten to the new schema
//!
//! Re-running a clone into an existing target skips everything already
//! present. Clones into the same target are serialized by an advisory lock.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_schema_clone::{CloneRequest, Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pg_schema_clone::CloneError> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let request = CloneRequest::for_tenant("template", "Acme", "9F2B")?;
//!     let report = orchestrator.copy_schema(&request, CancellationToken::new()).await?;
//!     println!("{}", report.to_json()?);
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod core;
pub mod ddl;
pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod phases;
pub mod pool;
pub mod report;

// Re-exports for convenient access
pub use catalog::CatalogSummary;
pub use config::{CloneConfig, Config, DatabaseConfig, LockMode, TimestampTriggerConfig};
pub use crate::core::{derive_namespace_name, CloneRequest};
pub use error::{CloneError, Result};
pub use orchestrator::Orchestrator;
pub use pool::HealthCheckResult;
pub use report::{CloneReport, CloneState, ObjectFailure, PhaseKind, PhaseReport};
