//! Descriptors read from the catalog.
//!
//! Descriptors are rebuilt from the live catalog on every clone and never
//! cached between calls.

use serde::{Deserialize, Serialize};

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Column definitions in ordinal order.
    pub columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Find a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns that take part in a data copy (generated columns excluded).
    pub fn copy_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.generated_expr.is_none())
            .map(|c| c.name.clone())
            .collect()
    }

    /// Whether an INSERT needs OVERRIDING SYSTEM VALUE.
    pub fn has_always_identity(&self) -> bool {
        self.columns
            .iter()
            .any(|c| c.identity == Some(IdentityKind::Always))
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,

    /// Rendered SQL type including length/precision, e.g. `numeric(10,2)`.
    pub data_type: String,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Default expression as rendered by the catalog.
    pub default_expr: Option<String>,

    /// Identity generation, if the column is an identity column.
    pub identity: Option<IdentityKind>,

    /// Expression of a stored generated column.
    pub generated_expr: Option<String>,
}

/// `GENERATED ... AS IDENTITY` flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    Always,
    ByDefault,
}

impl IdentityKind {
    /// Decode `pg_attribute.attidentity`.
    pub fn from_catalog(code: &str) -> Option<Self> {
        match code {
            "a" => Some(IdentityKind::Always),
            "d" => Some(IdentityKind::ByDefault),
            _ => None,
        }
    }
}

/// Primary key metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey {
    /// Owning table.
    pub table: String,

    /// Constraint name.
    pub name: String,

    /// Key columns in key order.
    pub columns: Vec<String>,
}

/// Unique and check constraints recreated alongside the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConstraint {
    /// Owning table.
    pub table: String,

    /// Constraint name.
    pub name: String,

    /// Constraint kind.
    pub kind: ConstraintKind,

    /// Definition as rendered by `pg_get_constraintdef`.
    pub definition: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Unique,
    Check,
}

/// Sequence position and parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceDescriptor {
    /// Sequence name.
    pub name: String,

    /// Last value handed out, or the first value to hand out if not called.
    pub last_value: i64,

    /// Whether `nextval` has been called since the last reset.
    pub is_called: bool,

    /// Sequence data type (`bigint`, `integer`, `smallint`).
    pub data_type: String,

    pub start_value: i64,
    pub increment_by: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub cache_size: i64,
    pub cycle: bool,
}

/// View metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDescriptor {
    /// View name.
    pub name: String,

    /// Definition as stored by the catalog (`pg_get_viewdef`).
    pub definition: String,
}

/// Foreign key metadata, one entry per constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referencing table.
    pub table: String,

    /// Constraint name.
    pub name: String,

    /// Referencing columns.
    pub columns: Vec<String>,

    /// Referenced schema.
    pub ref_schema: String,

    /// Referenced table.
    pub ref_table: String,

    /// Referenced columns, positionally matching `columns`.
    pub ref_columns: Vec<String>,

    /// ON UPDATE action.
    pub on_update: ReferentialAction,

    /// ON DELETE action.
    pub on_delete: ReferentialAction,
}

/// Referential action of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    /// Decode `pg_constraint.confupdtype` / `confdeltype`.
    pub fn from_catalog(code: &str) -> Self {
        match code {
            "r" => ReferentialAction::Restrict,
            "c" => ReferentialAction::Cascade,
            "n" => ReferentialAction::SetNull,
            "d" => ReferentialAction::SetDefault,
            _ => ReferentialAction::NoAction,
        }
    }

    /// SQL keyword form.
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// Secondary index metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Index name.
    pub name: String,

    /// Indexed table.
    pub table: String,

    /// Full `CREATE INDEX` statement from `pg_get_indexdef`.
    pub definition: String,
}

/// Names of the top-level objects in a schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaInventory {
    pub tables: Vec<String>,
    pub sequences: Vec<String>,
    pub views: Vec<String>,
}

impl SchemaInventory {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.sequences.is_empty() && self.views.is_empty()
    }
}

/// Summary of a schema, returned by `Orchestrator::inspect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSummary {
    pub schema: String,
    pub tables: Vec<String>,
    pub sequences: Vec<String>,
    pub views: Vec<String>,
    pub foreign_keys: i64,
    pub indexes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.to_string(),
            data_type: "integer".to_string(),
            is_nullable: true,
            default_expr: None,
            identity: None,
            generated_expr: None,
        }
    }

    #[test]
    fn test_copy_columns_skip_generated() {
        let mut total = column("total");
        total.generated_expr = Some("(price * qty)".to_string());
        let table = TableDescriptor {
            schema: "tmpl".into(),
            name: "lines".into(),
            columns: vec![column("price"), column("qty"), total],
        };
        assert_eq!(table.copy_columns(), vec!["price", "qty"]);
        assert_eq!(table.full_name(), "tmpl.lines");
    }

    #[test]
    fn test_always_identity_detection() {
        let mut id = column("id");
        id.identity = IdentityKind::from_catalog("d");
        let mut table = TableDescriptor {
            schema: "tmpl".into(),
            name: "t".into(),
            columns: vec![id],
        };
        assert!(!table.has_always_identity());
        table.columns[0].identity = IdentityKind::from_catalog("a");
        assert!(table.has_always_identity());
        assert_eq!(IdentityKind::from_catalog(""), None);
    }

    #[test]
    fn test_referential_action_codes() {
        assert_eq!(ReferentialAction::from_catalog("c").as_sql(), "CASCADE");
        assert_eq!(ReferentialAction::from_catalog("n").as_sql(), "SET NULL");
        assert_eq!(ReferentialAction::from_catalog("a").as_sql(), "NO ACTION");
        assert_eq!(ReferentialAction::from_catalog("?"), ReferentialAction::NoAction);
    }
}
