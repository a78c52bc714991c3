//! View phase.

use async_trait::async_trait;
use tokio_postgres::{Client, Transaction};
use tracing::{debug, info, warn};

use super::{begin, cancellable, execute, CloneContext, ClonePhase};
use crate::catalog::{self, ViewDescriptor};
use crate::ddl;
use crate::error::{CloneError, Result};
use crate::report::{PhaseKind, PhaseReport};

/// Recreates views with their schema qualifiers rewritten.
///
/// Views are attempted in name order. Views that fail are retried in another
/// pass as long as the previous pass created something, which settles views
/// selecting from other views.
pub struct ViewPhase;

#[async_trait]
impl ClonePhase for ViewPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Views
    }

    async fn run(&self, ctx: &CloneContext<'_>, report: &mut PhaseReport) -> Result<()> {
        let mut conn = ctx.connection(self.kind()).await?;
        let outcome = build_views(ctx, &mut conn, report).await;
        ctx.finish_connection(conn, &outcome);
        outcome
    }
}

async fn build_views(
    ctx: &CloneContext<'_>,
    client: &mut Client,
    report: &mut PhaseReport,
) -> Result<()> {
    if ctx.inventory.views.is_empty() {
        return Ok(());
    }

    let target = ctx.target();
    let mut tx = begin(ctx, client).await?;

    let mut pending: Vec<ViewDescriptor> = Vec::new();
    for name in &ctx.inventory.views {
        if cancellable(ctx.cancel, catalog::view_exists(&tx, target, name)).await? {
            debug!("View {}.{} exists, skipping", target, name);
            report.skipped += 1;
            continue;
        }
        pending.push(cancellable(ctx.cancel, catalog::view_definition(&tx, ctx.source(), name)).await?);
    }

    let mut pass = 1;
    let mut last_errors: Vec<(ViewDescriptor, CloneError)> = Vec::new();
    while !pending.is_empty() {
        let attempted = pending.len();
        last_errors.clear();

        for view in pending.drain(..) {
            let created = create_view(ctx, &mut tx, &view).await;
            match created {
                Ok(()) => report.applied += 1,
                Err(e) if e.is_abort() => return Err(e),
                Err(e) => last_errors.push((view, e)),
            }
        }

        if last_errors.is_empty() || last_errors.len() == attempted {
            break;
        }

        debug!(
            "View pass {}: {} views failed, retrying",
            pass,
            last_errors.len()
        );
        pending = last_errors.iter().map(|(view, _)| view.clone()).collect();
        pass += 1;
    }

    for (view, e) in last_errors {
        let message = e.full_message();
        warn!("Failed to create view {}.{}: {}", target, view.name, message);
        report.fail(view.name, message);
    }

    cancellable(ctx.cancel, tx.commit()).await?;
    info!("Created {} views in {}", report.applied, target);
    Ok(())
}

/// Create one view under a savepoint. A failure rolls back the savepoint and
/// is returned for the caller to retry or record.
async fn create_view(
    ctx: &CloneContext<'_>,
    tx: &mut Transaction<'_>,
    view: &ViewDescriptor,
) -> Result<()> {
    let sql = ddl::create_view(ctx.target(), &view.name, &view.definition, &ctx.rewrite())?;
    let sp = cancellable(ctx.cancel, tx.savepoint("clone_view")).await?;
    let created = execute(ctx, &sp, &sql).await;
    match created {
        Ok(()) => cancellable(ctx.cancel, sp.commit()).await,
        Err(e) => {
            if !e.is_abort() {
                cancellable(ctx.cancel, sp.rollback()).await?;
            }
            Err(e)
        }
    }
}
