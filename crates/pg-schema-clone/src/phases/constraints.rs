//! Foreign key and secondary index phases.

use async_trait::async_trait;
use tokio_postgres::Client;
use tracing::{debug, info, warn};

use super::{apply_in_savepoint, begin, cancellable, execute, CloneContext, ClonePhase};
use crate::catalog::{self, IndexDescriptor};
use crate::ddl;
use crate::error::Result;
use crate::report::{PhaseKind, PhaseReport};

/// Adds foreign keys after the data is in place, one savepoint per
/// constraint in a shared transaction.
pub struct ForeignKeyPhase;

#[async_trait]
impl ClonePhase for ForeignKeyPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::ForeignKeys
    }

    async fn run(&self, ctx: &CloneContext<'_>, report: &mut PhaseReport) -> Result<()> {
        let mut conn = ctx.connection(self.kind()).await?;
        let outcome = apply_foreign_keys(ctx, &mut conn, report).await;
        ctx.finish_connection(conn, &outcome);
        outcome
    }
}

async fn apply_foreign_keys(
    ctx: &CloneContext<'_>,
    client: &mut Client,
    report: &mut PhaseReport,
) -> Result<()> {
    let count = cancellable(ctx.cancel, catalog::count_foreign_keys(&*client, ctx.source())).await?;
    if count == 0 {
        info!("No foreign keys in {}, skipping", ctx.source());
        return Ok(());
    }

    let target = ctx.target();
    let rewrite = ctx.rewrite();
    let mut tx = begin(ctx, client).await?;
    let foreign_keys = cancellable(ctx.cancel, catalog::foreign_keys(&tx, ctx.source())).await?;

    for fk in &foreign_keys {
        let object = format!("{}.{}", fk.table, fk.name);
        if cancellable(
            ctx.cancel,
            catalog::constraint_exists(&tx, target, &fk.table, &fk.name),
        )
        .await?
        {
            debug!("Foreign key {} exists, skipping", object);
            report.skipped += 1;
            continue;
        }

        let sql = ddl::add_foreign_key(fk, &rewrite)?;
        if apply_in_savepoint(ctx, &mut tx, &object, &sql, report).await? {
            report.applied += 1;
        }
    }

    cancellable(ctx.cancel, tx.commit()).await?;
    info!(
        "Applied {} of {} foreign keys to {}",
        report.applied,
        foreign_keys.len(),
        target
    );
    Ok(())
}

/// Creates secondary indexes, each in its own transaction so one bad index
/// never undoes another.
pub struct IndexPhase;

#[async_trait]
impl ClonePhase for IndexPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Indexes
    }

    async fn run(&self, ctx: &CloneContext<'_>, report: &mut PhaseReport) -> Result<()> {
        let mut conn = ctx.connection(self.kind()).await?;
        let outcome = apply_indexes(ctx, &mut conn, report).await;
        ctx.finish_connection(conn, &outcome);
        outcome
    }
}

async fn apply_indexes(
    ctx: &CloneContext<'_>,
    client: &mut Client,
    report: &mut PhaseReport,
) -> Result<()> {
    let count = cancellable(ctx.cancel, catalog::count_indexes(&*client, ctx.source())).await?;
    if count == 0 {
        info!("No secondary indexes in {}, skipping", ctx.source());
        return Ok(());
    }

    // Definitions are rendered under the pinned search_path so expressions
    // come back fully qualified.
    let indexes = {
        let tx = begin(ctx, client).await?;
        let indexes = cancellable(ctx.cancel, catalog::indexes(&tx, ctx.source())).await?;
        cancellable(ctx.cancel, tx.commit()).await?;
        indexes
    };

    let rewrite = ctx.rewrite();
    for index in &indexes {
        if cancellable(
            ctx.cancel,
            catalog::index_exists(&*client, ctx.target(), &index.name),
        )
        .await?
        {
            debug!("Index {} exists, skipping", index.name);
            report.skipped += 1;
            continue;
        }

        let sql = ddl::create_index(index, &rewrite);
        let created = create_index(ctx, client, index, &sql).await;
        match created {
            Ok(()) => report.applied += 1,
            Err(e) if e.is_abort() => return Err(e),
            Err(e) => {
                let message = e.full_message();
                warn!("Failed to create index {}: {}", index.name, message);
                report.fail(format!("{}.{}", index.table, index.name), message);
            }
        }
    }

    info!(
        "Created {} of {} indexes in {}",
        report.applied,
        indexes.len(),
        ctx.target()
    );
    Ok(())
}

/// Create one index and commit. A failed transaction is rolled back on drop.
async fn create_index(
    ctx: &CloneContext<'_>,
    client: &mut Client,
    index: &IndexDescriptor,
    sql: &str,
) -> Result<()> {
    let tx = begin(ctx, client).await?;
    execute(ctx, &tx, sql).await?;
    cancellable(ctx.cancel, tx.commit()).await?;
    debug!("Created index {}", index.name);
    Ok(())
}
