//! Data phase: copy every table's rows server-side, one savepoint per table.

use async_trait::async_trait;
use tokio_postgres::{Client, GenericClient};
use tracing::{debug, info, warn};

use super::{begin, cancellable, execute, CloneContext, ClonePhase};
use crate::catalog;
use crate::ddl;
use crate::error::Result;
use crate::report::{PhaseKind, PhaseReport};

/// Copies rows into empty target tables.
pub struct DataPhase;

#[async_trait]
impl ClonePhase for DataPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Data
    }

    async fn run(&self, ctx: &CloneContext<'_>, report: &mut PhaseReport) -> Result<()> {
        let mut conn = ctx.connection(self.kind()).await?;
        let outcome = copy_tables(ctx, &mut conn, report).await;
        ctx.finish_connection(conn, &outcome);
        outcome
    }
}

enum TableCopy {
    Copied(u64),
    NoColumns,
    AlreadyFilled,
}

async fn copy_tables(ctx: &CloneContext<'_>, client: &mut Client, report: &mut PhaseReport) -> Result<()> {
    let mut tx = begin(ctx, client).await?;
    let mut rows_total: u64 = 0;

    for table in &ctx.inventory.tables {
        let sp = cancellable(ctx.cancel, tx.savepoint("clone_table")).await?;
        let copied = copy_table(ctx, &sp, table).await;
        match copied {
            Ok(TableCopy::Copied(rows)) => {
                cancellable(ctx.cancel, sp.commit()).await?;
                info!("{}: copied {} rows", table, rows);
                rows_total += rows;
                report.applied += 1;
            }
            Ok(TableCopy::NoColumns) => {
                cancellable(ctx.cancel, sp.commit()).await?;
                debug!("{}: no copyable columns, skipping", table);
                report.skipped += 1;
            }
            Ok(TableCopy::AlreadyFilled) => {
                cancellable(ctx.cancel, sp.commit()).await?;
                debug!("{}: target already has rows, skipping", table);
                report.skipped += 1;
            }
            Err(e) if e.is_abort() => return Err(e),
            Err(e) => {
                let message = e.full_message();
                warn!("Failed to copy {}: {}", table, message);
                cancellable(ctx.cancel, sp.rollback()).await?;
                report.fail(table.as_str(), message);
            }
        }
    }

    cancellable(ctx.cancel, tx.commit()).await?;
    info!(
        "Copied {} rows into {} tables of {}",
        rows_total,
        report.applied,
        ctx.target()
    );
    Ok(())
}

async fn copy_table<C>(ctx: &CloneContext<'_>, client: &C, table: &str) -> Result<TableCopy>
where
    C: GenericClient + Sync,
{
    let (source, target) = (ctx.source(), ctx.target());

    let descriptor = cancellable(ctx.cancel, catalog::load_table(client, source, table)).await?;
    let columns = descriptor.copy_columns();
    if columns.is_empty() {
        return Ok(TableCopy::NoColumns);
    }

    if cancellable(ctx.cancel, catalog::table_has_rows(client, target, table)).await? {
        return Ok(TableCopy::AlreadyFilled);
    }

    let sql = ddl::copy_table_data(
        source,
        target,
        table,
        &columns,
        descriptor.has_always_identity(),
    )?;
    debug!("{}", sql);
    let rows = cancellable(ctx.cancel, client.execute(sql.as_str(), &[])).await?;

    // Copied identity values bypass the target's identity sequence.
    for column in descriptor.columns.iter().filter(|c| c.identity.is_some()) {
        let source_seq = cancellable(
            ctx.cancel,
            catalog::identity_sequence(client, source, table, &column.name),
        )
        .await?;
        let target_seq = cancellable(
            ctx.cancel,
            catalog::identity_sequence(client, target, table, &column.name),
        )
        .await?;
        if let (Some(source_seq), Some(target_seq)) = (source_seq, target_seq) {
            let (last_value, is_called) =
                cancellable(ctx.cancel, catalog::sequence_position(client, &source_seq)).await?;
            execute(
                ctx,
                client,
                &ddl::set_sequence_value(&target_seq, last_value, is_called),
            )
            .await?;
        }
    }

    Ok(TableCopy::Copied(rows))
}
