//! Write phases of a clone.
//!
//! Each phase borrows one connection from the pool for its whole run and
//! works inside transactions opened through [`begin`], which pins
//! `search_path` and applies the configured statement timeout. Only the
//! structure phase is all-or-nothing; the others record per-object failures
//! in their [`PhaseReport`] and keep going.

mod constraints;
mod data;
mod structure;
mod views;

pub use constraints::{ForeignKeyPhase, IndexPhase};
pub use data::DataPhase;
pub use structure::StructurePhase;
pub use views::ViewPhase;

use std::future::Future;

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use tokio_postgres::{Client, GenericClient, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::catalog::SchemaInventory;
use crate::config::CloneConfig;
use crate::core::CloneRequest;
use crate::ddl::{self, Rewrite};
use crate::error::{CloneError, Result};
use crate::report::{PhaseKind, PhaseReport};

/// Everything a phase needs to know about the running clone.
pub struct CloneContext<'a> {
    pub request: &'a CloneRequest,
    pub config: &'a CloneConfig,
    pub pool: &'a Pool,
    pub cancel: &'a CancellationToken,

    /// Objects found in the source schema at the start of the run.
    pub inventory: &'a SchemaInventory,

    /// `(source name, target name)` for every source sequence.
    pub renamed_sequences: &'a [(String, String)],

    /// `(source name, target name)` for every relation the clone creates.
    pub relations: &'a [(String, String)],
}

impl<'a> CloneContext<'a> {
    pub fn source(&self) -> &str {
        &self.request.source
    }

    pub fn target(&self) -> &str {
        &self.request.target
    }

    pub fn rewrite(&self) -> Rewrite<'_> {
        Rewrite::new(&self.request.source, &self.request.target, self.relations)
    }

    /// Target name of a source sequence.
    pub fn sequence_target_name<'n>(&'n self, source_name: &'n str) -> &'n str {
        self.renamed_sequences
            .iter()
            .find(|(from, _)| from == source_name)
            .map(|(_, to)| to.as_str())
            .unwrap_or(source_name)
    }

    /// Borrow a connection for one phase.
    pub async fn connection(&self, phase: PhaseKind) -> Result<Object> {
        cancellable(self.cancel, async {
            self.pool
                .get()
                .await
                .map_err(|e| CloneError::pool(e, format!("{} phase", phase)))
        })
        .await
    }

    /// Hand a phase connection back. A connection whose statement was
    /// abandoned by cancellation is closed instead of being recycled.
    pub fn finish_connection<T>(&self, conn: Object, outcome: &Result<T>) {
        if matches!(outcome, Err(CloneError::Cancelled)) {
            debug!("Closing connection abandoned by cancellation");
            drop(Object::take(conn));
        }
    }
}

/// One step of the clone.
#[async_trait]
pub trait ClonePhase: Send + Sync {
    fn kind(&self) -> PhaseKind;

    /// Run the phase, recording counts and per-object failures in `report`.
    ///
    /// An `Err` is a phase-level failure. The orchestrator treats it as fatal
    /// for the structure phase and on cancellation; otherwise it is recorded
    /// on the phase and the clone continues.
    async fn run(&self, ctx: &CloneContext<'_>, report: &mut PhaseReport) -> Result<()>;
}

/// Race a fallible future against cancellation.
pub(crate) async fn cancellable<F, T, E>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<CloneError>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CloneError::Cancelled),
        res = fut => res.map_err(Into::into),
    }
}

/// Open a phase transaction.
pub(crate) async fn begin<'c>(
    ctx: &CloneContext<'_>,
    client: &'c mut Client,
) -> Result<Transaction<'c>> {
    let tx = cancellable(ctx.cancel, client.transaction()).await?;
    cancellable(ctx.cancel, tx.batch_execute(ddl::PIN_SEARCH_PATH)).await?;
    if let Some(secs) = ctx.config.statement_timeout_secs {
        cancellable(ctx.cancel, tx.batch_execute(&ddl::statement_timeout(secs))).await?;
    }
    Ok(tx)
}

/// Execute one statement.
pub(crate) async fn execute<C>(ctx: &CloneContext<'_>, client: &C, sql: &str) -> Result<()>
where
    C: GenericClient + Sync,
{
    debug!("{}", sql);
    cancellable(ctx.cancel, client.batch_execute(sql)).await
}

/// Execute one best-effort statement under its own savepoint.
///
/// Returns `Ok(true)` when the statement was applied and `Ok(false)` when it
/// failed and was rolled back; the failure is logged and recorded against
/// `object`. Cancellation and failures of the savepoint bookkeeping itself
/// are returned as errors.
pub(crate) async fn apply_in_savepoint(
    ctx: &CloneContext<'_>,
    tx: &mut Transaction<'_>,
    object: &str,
    sql: &str,
    report: &mut PhaseReport,
) -> Result<bool> {
    let sp = cancellable(ctx.cancel, tx.savepoint("clone_object")).await?;
    let executed = execute(ctx, &sp, sql).await;
    match executed {
        Ok(()) => {
            cancellable(ctx.cancel, sp.commit()).await?;
            Ok(true)
        }
        Err(e) if e.is_abort() => Err(e),
        Err(e) => {
            let message = e.full_message();
            warn!("Failed to create {}: {}", object, message);
            cancellable(ctx.cancel, sp.rollback()).await?;
            report.fail(object, message);
            Ok(false)
        }
    }
}
