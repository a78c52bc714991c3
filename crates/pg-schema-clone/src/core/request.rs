//! The clone request passed through every phase.

use super::identifier::validate_namespace_name;
use super::tenant::derive_namespace_name;
use crate::error::{CloneError, Result};
use serde::{Deserialize, Serialize};

/// Which template schema to clone into which new schema.
///
/// The database handle is not part of the request; it is the pool owned by
/// the [`Orchestrator`](crate::Orchestrator) that runs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneRequest {
    /// Template schema to read from.
    pub source: String,

    /// Schema to create and fill.
    pub target: String,
}

impl CloneRequest {
    /// Build a validated request.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Result<Self> {
        let request = Self {
            source: source.into(),
            target: target.into(),
        };
        request.validate()?;
        Ok(request)
    }

    /// Build a request whose target is derived from the tenant's display name
    /// and identifier.
    pub fn for_tenant(
        source: impl Into<String>,
        display_name: &str,
        tenant_id: &str,
    ) -> Result<Self> {
        let target = derive_namespace_name(display_name, tenant_id)?;
        Self::new(source, target)
    }

    /// Check that both names are valid schema names and differ.
    pub fn validate(&self) -> Result<()> {
        validate_namespace_name(&self.source)
            .map_err(|e| CloneError::InvalidRequest(format!("source: {}", e)))?;
        validate_namespace_name(&self.target)
            .map_err(|e| CloneError::InvalidRequest(format!("target: {}", e)))?;

        if self.source == self.target {
            return Err(CloneError::InvalidRequest(format!(
                "source and target schema are both '{}'",
                self.source
            )));
        }

        Ok(())
    }
}
