//! DDL synthesis.
//!
//! Pure functions turning catalog descriptors into statement text for the
//! target schema. Identifiers are always quoted. Catalog-rendered fragments
//! (defaults, constraint and view bodies, index definitions) are carried over
//! with references to cloned relations pointed at the target; column types
//! are copied verbatim, so schema-local types keep resolving to the template.

use crate::catalog::{
    ColumnDescriptor, ForeignKey, IdentityKind, IndexDescriptor, PrimaryKey, SequenceDescriptor,
    TableConstraint, TableDescriptor,
};
use crate::config::TimestampTriggerConfig;
use crate::core::identifier::{qualify, quote_ident, quote_literal, rewrite_references};
use crate::error::Result;

/// Pins name resolution inside phase transactions so the catalog renders
/// every user object schema-qualified.
pub const PIN_SEARCH_PATH: &str = "SET LOCAL search_path TO pg_catalog";

/// Schema-qualifier context shared by every rewrite.
#[derive(Debug, Clone)]
pub struct Rewrite<'a> {
    pub source: &'a str,
    pub target: &'a str,
    /// `(source name, target name)` of every relation the clone creates.
    pub relations: &'a [(String, String)],
}

impl<'a> Rewrite<'a> {
    pub fn new(source: &'a str, target: &'a str, relations: &'a [(String, String)]) -> Self {
        Self {
            source,
            target,
            relations,
        }
    }

    /// Rewrite catalog text for the target schema.
    pub fn apply(&self, text: &str) -> String {
        rewrite_references(text, self.source, self.target, self.relations)
    }

    /// Schema a reference should point at in the target.
    pub fn schema<'s>(&self, schema: &'s str) -> &'s str
    where
        'a: 's,
    {
        if schema == self.source {
            self.target
        } else {
            schema
        }
    }
}

/// `SET LOCAL statement_timeout` for a phase transaction.
pub fn statement_timeout(secs: u64) -> String {
    format!("SET LOCAL statement_timeout = '{}s'", secs)
}

/// `CREATE SCHEMA IF NOT EXISTS`.
pub fn create_schema(schema: &str) -> Result<String> {
    Ok(format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)?))
}

/// `CREATE SEQUENCE` reproducing the source parameters.
pub fn create_sequence(schema: &str, name: &str, seq: &SequenceDescriptor) -> Result<String> {
    Ok(format!(
        "CREATE SEQUENCE {} AS {} INCREMENT BY {} MINVALUE {} MAXVALUE {} START WITH {} CACHE {} {}",
        qualify(schema, name)?,
        seq.data_type,
        seq.increment_by,
        seq.min_value,
        seq.max_value,
        seq.start_value,
        seq.cache_size,
        if seq.cycle { "CYCLE" } else { "NO CYCLE" }
    ))
}

/// `setval` call putting a sequence at an exact position.
///
/// With `is_called = true` the next `nextval` returns `last_value + increment`;
/// with `false` it returns `last_value` itself.
pub fn set_sequence_value(qualified_name: &str, last_value: i64, is_called: bool) -> String {
    format!(
        "SELECT pg_catalog.setval({}, {}, {})",
        quote_literal(qualified_name),
        last_value,
        is_called
    )
}

fn column_definition(col: &ColumnDescriptor, rewrite: &Rewrite<'_>) -> Result<String> {
    let mut def = format!("{} {}", quote_ident(&col.name)?, col.data_type);

    if let Some(expr) = &col.generated_expr {
        def.push_str(&format!(" GENERATED ALWAYS AS ({}) STORED", rewrite.apply(expr)));
    } else if let Some(identity) = col.identity {
        def.push_str(match identity {
            IdentityKind::Always => " GENERATED ALWAYS AS IDENTITY",
            IdentityKind::ByDefault => " GENERATED BY DEFAULT AS IDENTITY",
        });
    } else if let Some(default) = &col.default_expr {
        def.push_str(&format!(" DEFAULT {}", rewrite.apply(default)));
    }

    if !col.is_nullable {
        def.push_str(" NOT NULL");
    }

    Ok(def)
}

/// `CREATE TABLE` for the target schema.
pub fn create_table(table: &TableDescriptor, rewrite: &Rewrite<'_>) -> Result<String> {
    let col_defs = table
        .columns
        .iter()
        .map(|c| column_definition(c, rewrite))
        .collect::<Result<Vec<_>>>()?;

    Ok(format!(
        "CREATE TABLE {} (\n    {}\n)",
        qualify(rewrite.target, &table.name)?,
        col_defs.join(",\n    ")
    ))
}

fn quote_list(names: &[String]) -> Result<String> {
    Ok(names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Result<Vec<_>>>()?
        .join(", "))
}

/// `ALTER TABLE … ADD CONSTRAINT … PRIMARY KEY`.
pub fn add_primary_key(schema: &str, pk: &PrimaryKey) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
        qualify(schema, &pk.table)?,
        quote_ident(&pk.name)?,
        quote_list(&pk.columns)?
    ))
}

/// `ALTER TABLE … ADD CONSTRAINT` for a unique or check constraint.
pub fn add_table_constraint(constraint: &TableConstraint, rewrite: &Rewrite<'_>) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} {}",
        qualify(rewrite.target, &constraint.table)?,
        quote_ident(&constraint.name)?,
        rewrite.apply(&constraint.definition)
    ))
}

/// Shared trigger function that stamps the configured column on update.
pub fn create_timestamp_function(trigger: &TimestampTriggerConfig) -> Result<String> {
    Ok(format!(
        "CREATE FUNCTION {}() RETURNS trigger LANGUAGE plpgsql AS $fn$\n\
         BEGIN\n    NEW.{} = now();\n    RETURN NEW;\nEND;\n$fn$",
        qualify(&trigger.function_schema, &trigger.function_name)?,
        quote_ident(&trigger.column)?
    ))
}

/// Attach the shared timestamp trigger to a table.
pub fn create_timestamp_trigger(
    schema: &str,
    table: &str,
    trigger: &TimestampTriggerConfig,
) -> Result<String> {
    Ok(format!(
        "CREATE TRIGGER {} BEFORE UPDATE ON {} FOR EACH ROW EXECUTE FUNCTION {}()",
        quote_ident(&trigger.trigger_name)?,
        qualify(schema, table)?,
        qualify(&trigger.function_schema, &trigger.function_name)?
    ))
}

/// `INSERT … SELECT` copying every row of a table.
pub fn copy_table_data(
    source: &str,
    target: &str,
    table: &str,
    columns: &[String],
    overriding_system_value: bool,
) -> Result<String> {
    let cols = quote_list(columns)?;
    Ok(format!(
        "INSERT INTO {} ({}){} SELECT {} FROM {}",
        qualify(target, table)?,
        cols,
        if overriding_system_value {
            " OVERRIDING SYSTEM VALUE"
        } else {
            ""
        },
        cols,
        qualify(source, table)?
    ))
}

/// `ALTER TABLE … ADD CONSTRAINT … FOREIGN KEY`. References into the source
/// schema are pointed at the target; references elsewhere are kept.
pub fn add_foreign_key(fk: &ForeignKey, rewrite: &Rewrite<'_>) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
        qualify(rewrite.target, &fk.table)?,
        quote_ident(&fk.name)?,
        quote_list(&fk.columns)?,
        qualify(rewrite.schema(&fk.ref_schema), &fk.ref_table)?,
        quote_list(&fk.ref_columns)?,
        fk.on_update.as_sql(),
        fk.on_delete.as_sql()
    ))
}

/// Index definition rewritten for the target schema.
pub fn create_index(index: &IndexDescriptor, rewrite: &Rewrite<'_>) -> String {
    rewrite.apply(&index.definition)
}

/// `CREATE VIEW` from a stored definition.
pub fn create_view(schema: &str, name: &str, definition: &str, rewrite: &Rewrite<'_>) -> Result<String> {
    let body = definition.trim().trim_end_matches(';').trim_end();
    Ok(format!(
        "CREATE VIEW {} AS\n{}",
        qualify(schema, name)?,
        rewrite.apply(body)
    ))
}
