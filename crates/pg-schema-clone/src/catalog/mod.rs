//! Catalog inspection.
//!
//! Read-only queries against `pg_catalog` describing the objects of one
//! schema, plus existence probes used to skip objects that a previous run
//! already created. Every function works on any [`GenericClient`], so the
//! same probe runs on a plain pooled client or inside a phase transaction.
//!
//! Enumeration returns an empty vector, not an error, for a schema without
//! objects of the requested kind (or a schema that does not exist).

mod types;

pub use types::*;

use std::collections::HashMap;

use tokio_postgres::GenericClient;
use tracing::debug;

use crate::core::identifier::qualify;
use crate::error::{CloneError, Result};

/// List ordinary and partitioned tables (partitions excluded).
pub async fn list_tables<C>(client: &C, schema: &str) -> Result<Vec<String>>
where
    C: GenericClient + Sync,
{
    let query = r#"
        SELECT c.relname::text
        FROM pg_catalog.pg_class c
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1
          AND c.relkind IN ('r', 'p')
          AND NOT c.relispartition
        ORDER BY c.relname
    "#;

    let rows = client
        .query(query, &[&schema])
        .await
        .map_err(|e| CloneError::catalog(format!("listing tables in {}", schema), e))?;

    Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
}

/// List free-standing sequences. Identity sequences belong to their column
/// and are recreated with it.
pub async fn list_sequences<C>(client: &C, schema: &str) -> Result<Vec<String>>
where
    C: GenericClient + Sync,
{
    let query = r#"
        SELECT c.relname::text
        FROM pg_catalog.pg_class c
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1
          AND c.relkind = 'S'
          AND NOT EXISTS (
              SELECT 1 FROM pg_catalog.pg_depend d
              WHERE d.classid = 'pg_catalog.pg_class'::regclass
                AND d.objid = c.oid
                AND d.deptype = 'i'
          )
        ORDER BY c.relname
    "#;

    let rows = client
        .query(query, &[&schema])
        .await
        .map_err(|e| CloneError::catalog(format!("listing sequences in {}", schema), e))?;

    Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
}

/// List (non-materialized) views.
pub async fn list_views<C>(client: &C, schema: &str) -> Result<Vec<String>>
where
    C: GenericClient + Sync,
{
    let query = r#"
        SELECT c.relname::text
        FROM pg_catalog.pg_class c
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1 AND c.relkind = 'v'
        ORDER BY c.relname
    "#;

    let rows = client
        .query(query, &[&schema])
        .await
        .map_err(|e| CloneError::catalog(format!("listing views in {}", schema), e))?;

    Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
}

/// Enumerate tables, sequences and views of a schema.
pub async fn inventory<C>(client: &C, schema: &str) -> Result<SchemaInventory>
where
    C: GenericClient + Sync,
{
    Ok(SchemaInventory {
        tables: list_tables(client, schema).await?,
        sequences: list_sequences(client, schema).await?,
        views: list_views(client, schema).await?,
    })
}

/// Load a table with its columns in ordinal order.
pub async fn load_table<C>(client: &C, schema: &str, table: &str) -> Result<TableDescriptor>
where
    C: GenericClient + Sync,
{
    let query = r#"
        SELECT
            a.attname::text,
            pg_catalog.format_type(a.atttypid, a.atttypmod),
            NOT a.attnotnull,
            CASE WHEN a.attgenerated = '' THEN pg_catalog.pg_get_expr(d.adbin, d.adrelid) END,
            a.attidentity::text,
            CASE WHEN a.attgenerated <> '' THEN pg_catalog.pg_get_expr(d.adbin, d.adrelid) END
        FROM pg_catalog.pg_attribute a
        JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
        WHERE n.nspname = $1
          AND c.relname = $2
          AND a.attnum > 0
          AND NOT a.attisdropped
        ORDER BY a.attnum
    "#;

    let rows = client
        .query(query, &[&schema, &table])
        .await
        .map_err(|e| CloneError::catalog(format!("loading columns of {}.{}", schema, table), e))?;

    let columns: Vec<ColumnDescriptor> = rows
        .iter()
        .map(|row| ColumnDescriptor {
            name: row.get(0),
            data_type: row.get(1),
            is_nullable: row.get(2),
            default_expr: row.get(3),
            identity: IdentityKind::from_catalog(row.get::<_, &str>(4)),
            generated_expr: row.get(5),
        })
        .collect();

    debug!("Loaded {} columns for {}.{}", columns.len(), schema, table);

    Ok(TableDescriptor {
        schema: schema.to_string(),
        name: table.to_string(),
        columns,
    })
}

/// Ordered column names to copy for a table. Empty when the table is gone or
/// has only generated columns.
pub async fn load_columns<C>(client: &C, schema: &str, table: &str) -> Result<Vec<String>>
where
    C: GenericClient + Sync,
{
    Ok(load_table(client, schema, table).await?.copy_columns())
}

/// Load the primary key of a table, if it has one.
pub async fn primary_key<C>(client: &C, schema: &str, table: &str) -> Result<Option<PrimaryKey>>
where
    C: GenericClient + Sync,
{
    let query = r#"
        SELECT c.conname::text, a.attname::text
        FROM pg_catalog.pg_constraint c
        JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid
        WHERE n.nspname = $1
          AND t.relname = $2
          AND c.contype = 'p'
          AND a.attnum = ANY(c.conkey)
        ORDER BY array_position(c.conkey, a.attnum)
    "#;

    let rows = client
        .query(query, &[&schema, &table])
        .await
        .map_err(|e| CloneError::catalog(format!("loading primary key of {}.{}", schema, table), e))?;

    let Some(first) = rows.first() else {
        return Ok(None);
    };

    let pk = PrimaryKey {
        table: table.to_string(),
        name: first.get(0),
        columns: rows.iter().map(|r| r.get::<_, String>(1)).collect(),
    };

    debug!("Primary key for {}.{}: {:?}", schema, table, pk.columns);
    Ok(Some(pk))
}

/// Load unique and check constraints of a table.
pub async fn table_constraints<C>(
    client: &C,
    schema: &str,
    table: &str,
) -> Result<Vec<TableConstraint>>
where
    C: GenericClient + Sync,
{
    let query = r#"
        SELECT c.conname::text, c.contype::text, pg_catalog.pg_get_constraintdef(c.oid)
        FROM pg_catalog.pg_constraint c
        JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
        WHERE n.nspname = $1
          AND t.relname = $2
          AND c.contype IN ('u', 'c')
        ORDER BY c.conname
    "#;

    let rows = client
        .query(query, &[&schema, &table])
        .await
        .map_err(|e| CloneError::catalog(format!("loading constraints of {}.{}", schema, table), e))?;

    Ok(rows
        .iter()
        .map(|row| TableConstraint {
            table: table.to_string(),
            name: row.get(0),
            kind: if row.get::<_, &str>(1) == "u" {
                ConstraintKind::Unique
            } else {
                ConstraintKind::Check
            },
            definition: row.get(2),
        })
        .collect())
}

/// Read a sequence's position and parameters.
pub async fn sequence_state<C>(client: &C, schema: &str, name: &str) -> Result<SequenceDescriptor>
where
    C: GenericClient + Sync,
{
    let what = || format!("reading sequence {}.{}", schema, name);

    let params = client
        .query_one(
            r#"
            SELECT data_type::text, start_value, increment_by, min_value, max_value,
                   cache_size, cycle
            FROM pg_catalog.pg_sequences
            WHERE schemaname = $1 AND sequencename = $2
            "#,
            &[&schema, &name],
        )
        .await
        .map_err(|e| CloneError::catalog(what(), e))?;

    // pg_sequences.last_value hides is_called; the relation itself has both.
    let position_sql = format!("SELECT last_value, is_called FROM {}", qualify(schema, name)?);
    let position = client
        .query_one(position_sql.as_str(), &[])
        .await
        .map_err(|e| CloneError::catalog(what(), e))?;

    Ok(SequenceDescriptor {
        name: name.to_string(),
        last_value: position.get(0),
        is_called: position.get(1),
        data_type: params.get(0),
        start_value: params.get(1),
        increment_by: params.get(2),
        min_value: params.get(3),
        max_value: params.get(4),
        cache_size: params.get(5),
        cycle: params.get(6),
    })
}

/// Identity sequence backing a column, as a qualified name, if any.
pub async fn identity_sequence<C>(
    client: &C,
    schema: &str,
    table: &str,
    column: &str,
) -> Result<Option<String>>
where
    C: GenericClient + Sync,
{
    let qualified = qualify(schema, table)?;
    let row = client
        .query_one(
            "SELECT pg_catalog.pg_get_serial_sequence($1, $2)",
            &[&qualified, &column],
        )
        .await
        .map_err(|e| {
            CloneError::catalog(format!("finding sequence of {}.{}.{}", schema, table, column), e)
        })?;
    Ok(row.get(0))
}

/// Read `(last_value, is_called)` of a sequence given its qualified name as
/// returned by `pg_get_serial_sequence`.
pub async fn sequence_position<C>(client: &C, qualified_name: &str) -> Result<(i64, bool)>
where
    C: GenericClient + Sync,
{
    let sql = format!("SELECT last_value, is_called FROM {}", qualified_name);
    let row = client
        .query_one(sql.as_str(), &[])
        .await
        .map_err(|e| CloneError::catalog(format!("reading sequence {}", qualified_name), e))?;
    Ok((row.get(0), row.get(1)))
}

/// Fetch a view's stored definition.
pub async fn view_definition<C>(client: &C, schema: &str, view: &str) -> Result<ViewDescriptor>
where
    C: GenericClient + Sync,
{
    let query = r#"
        SELECT pg_catalog.pg_get_viewdef(c.oid)
        FROM pg_catalog.pg_class c
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1 AND c.relname = $2 AND c.relkind = 'v'
    "#;

    let row = client
        .query_one(query, &[&schema, &view])
        .await
        .map_err(|e| CloneError::catalog(format!("reading view {}.{}", schema, view), e))?;

    Ok(ViewDescriptor {
        name: view.to_string(),
        definition: row.get(0),
    })
}

/// Count foreign key constraints owned by a schema.
pub async fn count_foreign_keys<C>(client: &C, schema: &str) -> Result<i64>
where
    C: GenericClient + Sync,
{
    let query = r#"
        SELECT COUNT(*)
        FROM pg_catalog.pg_constraint c
        JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
        WHERE n.nspname = $1 AND c.contype = 'f'
    "#;

    let row = client
        .query_one(query, &[&schema])
        .await
        .map_err(|e| CloneError::catalog(format!("counting foreign keys in {}", schema), e))?;
    Ok(row.get(0))
}

/// One column pair of a foreign key, as returned by the catalog.
#[derive(Debug, Clone)]
pub struct ForeignKeyColumnRow {
    pub table: String,
    pub name: String,
    pub column: String,
    pub ref_schema: String,
    pub ref_table: String,
    pub ref_column: String,
    pub on_update: ReferentialAction,
    pub on_delete: ReferentialAction,
}

/// Group per-column rows into one [`ForeignKey`] per (table, constraint),
/// preserving first-seen order and column order.
pub fn group_foreign_keys(rows: Vec<ForeignKeyColumnRow>) -> Vec<ForeignKey> {
    let mut keys: Vec<ForeignKey> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for row in rows {
        let key = (row.table.clone(), row.name.clone());
        match index.get(&key) {
            Some(&i) => {
                keys[i].columns.push(row.column);
                keys[i].ref_columns.push(row.ref_column);
            }
            None => {
                index.insert(key, keys.len());
                keys.push(ForeignKey {
                    table: row.table,
                    name: row.name,
                    columns: vec![row.column],
                    ref_schema: row.ref_schema,
                    ref_table: row.ref_table,
                    ref_columns: vec![row.ref_column],
                    on_update: row.on_update,
                    on_delete: row.on_delete,
                });
            }
        }
    }

    keys
}

/// Load foreign keys of a schema, grouped per constraint.
pub async fn foreign_keys<C>(client: &C, schema: &str) -> Result<Vec<ForeignKey>>
where
    C: GenericClient + Sync,
{
    let query = r#"
        SELECT
            t.relname::text,
            c.conname::text,
            a.attname::text,
            rn.nspname::text,
            rt.relname::text,
            ra.attname::text,
            c.confupdtype::text,
            c.confdeltype::text
        FROM pg_catalog.pg_constraint c
        JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_catalog.pg_class rt ON rt.oid = c.confrelid
        JOIN pg_catalog.pg_namespace rn ON rn.oid = rt.relnamespace
        CROSS JOIN LATERAL unnest(c.conkey, c.confkey) WITH ORDINALITY AS k(attnum, refattnum, ord)
        JOIN pg_catalog.pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum
        JOIN pg_catalog.pg_attribute ra ON ra.attrelid = c.confrelid AND ra.attnum = k.refattnum
        WHERE n.nspname = $1 AND c.contype = 'f'
        ORDER BY t.relname, c.conname, k.ord
    "#;

    let rows = client
        .query(query, &[&schema])
        .await
        .map_err(|e| CloneError::catalog(format!("loading foreign keys of {}", schema), e))?;

    let rows = rows
        .iter()
        .map(|row| ForeignKeyColumnRow {
            table: row.get(0),
            name: row.get(1),
            column: row.get(2),
            ref_schema: row.get(3),
            ref_table: row.get(4),
            ref_column: row.get(5),
            on_update: ReferentialAction::from_catalog(row.get::<_, &str>(6)),
            on_delete: ReferentialAction::from_catalog(row.get::<_, &str>(7)),
        })
        .collect();

    Ok(group_foreign_keys(rows))
}

const SECONDARY_INDEX_FILTER: &str = r#"
    FROM pg_catalog.pg_index x
    JOIN pg_catalog.pg_class ic ON ic.oid = x.indexrelid
    JOIN pg_catalog.pg_class t ON t.oid = x.indrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    WHERE n.nspname = $1
      AND t.relkind IN ('r', 'p')
      AND NOT t.relispartition
      AND NOT EXISTS (
          SELECT 1 FROM pg_catalog.pg_constraint c
          WHERE c.conindid = x.indexrelid AND c.contype IN ('p', 'u', 'x')
      )
"#;

/// Count indexes that do not back a primary key, unique or exclusion
/// constraint.
pub async fn count_indexes<C>(client: &C, schema: &str) -> Result<i64>
where
    C: GenericClient + Sync,
{
    let query = format!("SELECT COUNT(*) {}", SECONDARY_INDEX_FILTER);
    let row = client
        .query_one(query.as_str(), &[&schema])
        .await
        .map_err(|e| CloneError::catalog(format!("counting indexes in {}", schema), e))?;
    Ok(row.get(0))
}

/// Load secondary index definitions of a schema.
pub async fn indexes<C>(client: &C, schema: &str) -> Result<Vec<IndexDescriptor>>
where
    C: GenericClient + Sync,
{
    let query = format!(
        "SELECT ic.relname::text, t.relname::text, pg_catalog.pg_get_indexdef(x.indexrelid) {} ORDER BY ic.relname",
        SECONDARY_INDEX_FILTER
    );
    let rows = client
        .query(query.as_str(), &[&schema])
        .await
        .map_err(|e| CloneError::catalog(format!("loading indexes of {}", schema), e))?;

    Ok(rows
        .iter()
        .map(|row| IndexDescriptor {
            name: row.get(0),
            table: row.get(1),
            definition: row.get(2),
        })
        .collect())
}

/// Summarize a schema for display.
pub async fn summarize<C>(client: &C, schema: &str) -> Result<CatalogSummary>
where
    C: GenericClient + Sync,
{
    let inv = inventory(client, schema).await?;
    Ok(CatalogSummary {
        schema: schema.to_string(),
        foreign_keys: count_foreign_keys(client, schema).await?,
        indexes: count_indexes(client, schema).await?,
        tables: inv.tables,
        sequences: inv.sequences,
        views: inv.views,
    })
}

// === Existence probes ===

async fn relation_exists<C>(client: &C, schema: &str, name: &str, kinds: &[&str]) -> Result<bool>
where
    C: GenericClient + Sync,
{
    let query = r#"
        SELECT EXISTS (
            SELECT 1
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2 AND c.relkind::text = ANY($3)
        )
    "#;

    let row = client
        .query_one(query, &[&schema, &name, &kinds])
        .await
        .map_err(|e| CloneError::catalog(format!("checking for {}.{}", schema, name), e))?;
    Ok(row.get(0))
}

/// Check if a schema exists.
pub async fn schema_exists<C>(client: &C, schema: &str) -> Result<bool>
where
    C: GenericClient + Sync,
{
    let row = client
        .query_one(
            "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1)",
            &[&schema],
        )
        .await
        .map_err(|e| CloneError::catalog(format!("checking for schema {}", schema), e))?;
    Ok(row.get(0))
}

/// Check if a table exists.
pub async fn table_exists<C>(client: &C, schema: &str, table: &str) -> Result<bool>
where
    C: GenericClient + Sync,
{
    relation_exists(client, schema, table, &["r", "p"]).await
}

/// Check if a sequence exists.
pub async fn sequence_exists<C>(client: &C, schema: &str, sequence: &str) -> Result<bool>
where
    C: GenericClient + Sync,
{
    relation_exists(client, schema, sequence, &["S"]).await
}

/// Check if a view exists.
pub async fn view_exists<C>(client: &C, schema: &str, view: &str) -> Result<bool>
where
    C: GenericClient + Sync,
{
    relation_exists(client, schema, view, &["v"]).await
}

/// Check if an index exists.
pub async fn index_exists<C>(client: &C, schema: &str, index: &str) -> Result<bool>
where
    C: GenericClient + Sync,
{
    relation_exists(client, schema, index, &["i", "I"]).await
}

/// Check if a table has a constraint of the given name.
pub async fn constraint_exists<C>(client: &C, schema: &str, table: &str, name: &str) -> Result<bool>
where
    C: GenericClient + Sync,
{
    let query = r#"
        SELECT EXISTS (
            SELECT 1
            FROM pg_catalog.pg_constraint c
            JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            WHERE n.nspname = $1 AND t.relname = $2 AND c.conname = $3
        )
    "#;

    let row = client
        .query_one(query, &[&schema, &table, &name])
        .await
        .map_err(|e| CloneError::catalog(format!("checking constraint {} on {}.{}", name, schema, table), e))?;
    Ok(row.get(0))
}

/// Check if a function of the given name exists in a schema.
pub async fn function_exists<C>(client: &C, schema: &str, name: &str) -> Result<bool>
where
    C: GenericClient + Sync,
{
    let query = r#"
        SELECT EXISTS (
            SELECT 1
            FROM pg_catalog.pg_proc p
            JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
            WHERE n.nspname = $1 AND p.proname = $2
        )
    "#;

    let row = client
        .query_one(query, &[&schema, &name])
        .await
        .map_err(|e| CloneError::catalog(format!("checking for function {}.{}", schema, name), e))?;
    Ok(row.get(0))
}

/// Check whether a table holds at least one row.
pub async fn table_has_rows<C>(client: &C, schema: &str, table: &str) -> Result<bool>
where
    C: GenericClient + Sync,
{
    let sql = format!("SELECT EXISTS (SELECT 1 FROM {})", qualify(schema, table)?);
    let row = client
        .query_one(sql.as_str(), &[])
        .await
        .map_err(|e| CloneError::catalog(format!("checking rows of {}.{}", schema, table), e))?;
    Ok(row.get(0))
}

/// Exact row count of a table.
pub async fn row_count<C>(client: &C, schema: &str, table: &str) -> Result<i64>
where
    C: GenericClient + Sync,
{
    let sql = format!("SELECT COUNT(*) FROM {}", qualify(schema, table)?);
    let row = client
        .query_one(sql.as_str(), &[])
        .await
        .map_err(|e| CloneError::catalog(format!("counting rows of {}.{}", schema, table), e))?;
    Ok(row.get(0))
}
