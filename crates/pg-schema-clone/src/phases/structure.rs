//! Structure phase: schema, sequences, tables and their table-level
//! constraints, all in one transaction.

use async_trait::async_trait;
use tokio_postgres::{Client, Transaction};
use tracing::{debug, info, warn};

use super::{begin, cancellable, CloneContext, ClonePhase};
use crate::catalog;
use crate::core::identifier::qualify;
use crate::ddl;
use crate::error::{CloneError, Result};
use crate::lock::lock_key;
use crate::report::{PhaseKind, PhaseReport};

/// Creates the target schema and everything that must exist before data is
/// copied. Any failure rolls the whole phase back.
pub struct StructurePhase;

#[async_trait]
impl ClonePhase for StructurePhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Structure
    }

    async fn run(&self, ctx: &CloneContext<'_>, report: &mut PhaseReport) -> Result<()> {
        let mut conn = ctx.connection(self.kind()).await?;
        let outcome = build_structure(ctx, &mut conn, report).await;
        ctx.finish_connection(conn, &outcome);
        outcome
    }
}

async fn build_structure(
    ctx: &CloneContext<'_>,
    client: &mut Client,
    report: &mut PhaseReport,
) -> Result<()> {
    let target = ctx.target();
    let tx = begin(ctx, client).await?;

    apply(ctx, &tx, target, &ddl::create_schema(target)?).await?;

    let attach_triggers = ensure_trigger_function(ctx, &tx).await?;

    for name in &ctx.inventory.sequences {
        let target_name = ctx.sequence_target_name(name);
        if cancellable(ctx.cancel, catalog::sequence_exists(&tx, target, target_name)).await? {
            debug!("Sequence {}.{} exists, skipping", target, target_name);
            report.skipped += 1;
            continue;
        }

        let seq = cancellable(ctx.cancel, catalog::sequence_state(&tx, ctx.source(), name)).await?;
        apply(ctx, &tx, target_name, &ddl::create_sequence(target, target_name, &seq)?).await?;
        apply(
            ctx,
            &tx,
            target_name,
            &ddl::set_sequence_value(&qualify(target, target_name)?, seq.last_value, seq.is_called),
        )
        .await?;
        report.applied += 1;
    }

    let rewrite = ctx.rewrite();
    for name in &ctx.inventory.tables {
        if cancellable(ctx.cancel, catalog::table_exists(&tx, target, name)).await? {
            debug!("Table {}.{} exists, skipping", target, name);
            report.skipped += 1;
            continue;
        }

        let table = cancellable(ctx.cancel, catalog::load_table(&tx, ctx.source(), name)).await?;
        apply(ctx, &tx, name, &ddl::create_table(&table, &rewrite)?).await?;

        if let Some(pk) = cancellable(ctx.cancel, catalog::primary_key(&tx, ctx.source(), name)).await? {
            apply(ctx, &tx, &pk.name, &ddl::add_primary_key(target, &pk)?).await?;
        }

        let constraints =
            cancellable(ctx.cancel, catalog::table_constraints(&tx, ctx.source(), name)).await?;
        for constraint in &constraints {
            apply(ctx, &tx, &constraint.name, &ddl::add_table_constraint(constraint, &rewrite)?)
                .await?;
        }

        let trigger = &ctx.config.timestamp_trigger;
        if attach_triggers && table.column(&trigger.column).is_some() {
            apply(
                ctx,
                &tx,
                &trigger.trigger_name,
                &ddl::create_timestamp_trigger(target, name, trigger)?,
            )
            .await?;
        }

        report.applied += 1;
    }

    cancellable(ctx.cancel, async {
        tx.commit()
            .await
            .map_err(|e| CloneError::structure("commit", e))
    })
    .await?;

    info!(
        "Structure of {} ready: {} objects created, {} already present",
        target, report.applied, report.skipped
    );
    Ok(())
}

/// Make sure the shared timestamp trigger function exists. Returns whether
/// triggers should be attached.
async fn ensure_trigger_function(ctx: &CloneContext<'_>, tx: &Transaction<'_>) -> Result<bool> {
    let trigger = &ctx.config.timestamp_trigger;
    if !trigger.enabled {
        return Ok(false);
    }

    let function = qualify(&trigger.function_schema, &trigger.function_name)?;

    // Serialize concurrent clones racing to create the shared function.
    cancellable(
        ctx.cancel,
        tx.execute(
            "SELECT pg_catalog.pg_advisory_xact_lock($1)",
            &[&lock_key(&function)],
        ),
    )
    .await?;

    let exists = cancellable(
        ctx.cancel,
        catalog::function_exists(tx, &trigger.function_schema, &trigger.function_name),
    )
    .await?;
    if exists {
        return Ok(true);
    }

    if !trigger.create_function {
        warn!(
            "Trigger function {} does not exist and create_function is off; tables get no timestamp trigger",
            function
        );
        return Ok(false);
    }

    info!("Creating trigger function {}", function);
    apply(ctx, tx, &function, &ddl::create_timestamp_function(trigger)?).await?;
    Ok(true)
}

/// Execute a structure statement; any failure is fatal for the phase.
async fn apply(ctx: &CloneContext<'_>, tx: &Transaction<'_>, object: &str, sql: &str) -> Result<()> {
    debug!("{}", sql);
    cancellable(ctx.cancel, async {
        tx.batch_execute(sql)
            .await
            .map_err(|e| CloneError::structure(object, e))
    })
    .await
}
