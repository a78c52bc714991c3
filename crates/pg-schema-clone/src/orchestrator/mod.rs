//! Clone orchestrator - runs the phases in order and owns the run's state.

use chrono::Utc;
use deadpool_postgres::Pool;
use tokio_postgres::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{self, CatalogSummary};
use crate::config::{CloneConfig, Config, LockMode};
use crate::core::identifier::{rename_sequence, validate_namespace_name};
use crate::core::CloneRequest;
use crate::error::{CloneError, Result};
use crate::lock::NamespaceLock;
use crate::phases::{
    cancellable, CloneContext, ClonePhase, DataPhase, ForeignKeyPhase, IndexPhase, StructurePhase,
    ViewPhase,
};
use crate::pool::{self, HealthCheckResult};
use crate::report::{CloneReport, PhaseKind, PhaseReport};

/// Clone orchestrator.
pub struct Orchestrator {
    pool: Pool,
    config: CloneConfig,
    config_hash: Option<String>,
}

impl Orchestrator {
    /// Create an orchestrator with its own connection pool.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let pool = pool::create_pool(&config.database).await?;
        Ok(Self {
            pool,
            config_hash: Some(config.hash()),
            config: config.clone,
        })
    }

    /// Create an orchestrator on a pool the caller already runs.
    pub fn with_pool(pool: Pool, config: CloneConfig) -> Result<Self> {
        config.validate()?;

        // The lock holds one connection for the whole run.
        let needed = if config.lock_mode == LockMode::Disabled { 1 } else { 2 };
        let max_size = pool.status().max_size;
        if max_size < needed {
            return Err(CloneError::Config(format!(
                "pool max_size {} is too small; at least {} connections are needed",
                max_size, needed
            )));
        }

        Ok(Self {
            pool,
            config,
            config_hash: None,
        })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn config(&self) -> &CloneConfig {
        &self.config
    }

    /// Request cloning the configured template schema into `target`.
    pub fn request(&self, target: impl Into<String>) -> Result<CloneRequest> {
        CloneRequest::new(self.config.source_schema.clone(), target)
    }

    /// Clone `request.source` into `request.target`.
    ///
    /// Returns `Err` only for fatal conditions: invalid request, catalog
    /// enumeration failure, a rolled-back structure phase, lock contention or
    /// cancellation. Everything else is reported per phase in the
    /// [`CloneReport`].
    pub async fn copy_schema(
        &self,
        request: &CloneRequest,
        cancel: CancellationToken,
    ) -> Result<CloneReport> {
        request.validate()?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let mut report = CloneReport::new(run_id, &request.source, &request.target, Utc::now());
        report.config_hash = self.config_hash.clone();
        info!(
            "Starting clone run {}: {} -> {}",
            report.run_id, request.source, request.target
        );

        let lock =
            NamespaceLock::acquire(&self.pool, &request.target, self.config.lock_mode, &cancel)
                .await?;

        let outcome = self.run_phases(request, &cancel, &mut report).await;

        if let Err(e) = lock.release().await {
            warn!(
                "Failed to release advisory lock for {}: {}",
                request.target,
                e.full_message()
            );
        }
        outcome?;

        report.finish();
        let failures = report.failures().count();
        if failures == 0 {
            info!(
                "Clone {} -> {} completed in {:.1}s",
                request.source, request.target, report.duration_seconds
            );
        } else {
            warn!(
                "Clone {} -> {} completed in {:.1}s with {} failed objects",
                request.source, request.target, report.duration_seconds, failures
            );
        }
        Ok(report)
    }

    async fn run_phases(
        &self,
        request: &CloneRequest,
        cancel: &CancellationToken,
        report: &mut CloneReport,
    ) -> Result<()> {
        let inventory = {
            let conn = cancellable(cancel, async {
                self.pool
                    .get()
                    .await
                    .map_err(|e| CloneError::pool(e, "reading source catalog"))
            })
            .await?;
            let client: &Client = &conn;

            if !cancellable(cancel, catalog::schema_exists(client, &request.source)).await? {
                return Err(CloneError::InvalidRequest(format!(
                    "source schema '{}' does not exist",
                    request.source
                )));
            }
            cancellable(cancel, catalog::inventory(client, &request.source)).await?
        };
        info!(
            "Found {} tables, {} sequences, {} views in {}",
            inventory.tables.len(),
            inventory.sequences.len(),
            inventory.views.len(),
            request.source
        );

        let renamed_sequences: Vec<(String, String)> = inventory
            .sequences
            .iter()
            .map(|s| (s.clone(), rename_sequence(s, &request.source, &request.target)))
            .collect();

        let relations: Vec<(String, String)> = inventory
            .tables
            .iter()
            .chain(&inventory.views)
            .map(|name| (name.clone(), name.clone()))
            .chain(renamed_sequences.iter().cloned())
            .collect();

        let ctx = CloneContext {
            request,
            config: &self.config,
            pool: &self.pool,
            cancel,
            inventory: &inventory,
            renamed_sequences: &renamed_sequences,
            relations: &relations,
        };

        let phases: [Box<dyn ClonePhase>; 5] = [
            Box::new(StructurePhase),
            Box::new(DataPhase),
            Box::new(ForeignKeyPhase),
            Box::new(IndexPhase),
            Box::new(ViewPhase),
        ];

        for (i, phase) in phases.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(CloneError::Cancelled);
            }

            let kind = phase.kind();
            info!("Phase {}: {}", i + 1, kind);
            let mut phase_report = PhaseReport::new(kind);

            let outcome = phase.run(&ctx, &mut phase_report).await;
            match outcome {
                Ok(()) => {}
                Err(e) if kind == PhaseKind::Structure || e.is_abort() => return Err(e),
                Err(e) => {
                    let message = e.full_message();
                    warn!("{} phase aborted, continuing: {}", kind, message);
                    phase_report.error = Some(message);
                }
            }

            debug!(
                "{}: {} applied, {} skipped, {} failed",
                kind,
                phase_report.applied,
                phase_report.skipped,
                phase_report.failed.len()
            );
            report.phases.push(phase_report);

            // The structure transaction covers both schema creation and the
            // structures, so it steps through SchemaCreated on commit.
            while report.state < kind.completes() {
                report.state = report.state.next();
                debug!("Clone state: {}", report.state);
            }
        }

        report.state = report.state.next();
        Ok(())
    }

    /// Summarize a schema's catalog.
    pub async fn inspect(&self, source: &str) -> Result<CatalogSummary> {
        validate_namespace_name(source)?;
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| CloneError::pool(e, "inspecting catalog"))?;
        let client: &Client = &conn;
        catalog::summarize(client, source).await
    }

    /// Test database connectivity.
    pub async fn health_check(&self) -> HealthCheckResult {
        pool::health_check(&self.pool).await
    }
}
