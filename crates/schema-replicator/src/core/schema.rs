//! Schema and metadata types for tables, columns, and constraints.
//!
//! These are point-in-time snapshots read from one endpoint. They are never
//! mutated after being read; a new comparison re-reads them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Index participation flag reported for a column (`SHOW COLUMNS` `Key`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyFlag {
    #[default]
    None,
    /// Part of the primary key.
    Pri,
    /// First column of a unique index.
    Uni,
    /// First column of a non-unique index (or a foreign key).
    Mul,
}

impl KeyFlag {
    /// Parse the server's key column. Unknown or empty values map to `None`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PRI" => KeyFlag::Pri,
            "UNI" => KeyFlag::Uni,
            "MUL" => KeyFlag::Mul,
            _ => KeyFlag::None,
        }
    }

    /// Whether the column takes part in any key.
    pub fn is_keyed(&self) -> bool {
        !matches!(self, KeyFlag::None)
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name. This is the column's identity when diffing.
    pub name: String,

    /// Full column type (e.g., "int unsigned", "varchar(255)").
    pub data_type: String,

    /// Whether the column allows NULL.
    pub nullable: bool,

    /// Key participation.
    pub key: KeyFlag,

    /// Default value, if any.
    pub default_value: Option<String>,

    /// Dialect-specific extra clause (e.g., "auto_increment").
    pub extra: String,
}

impl ColumnDescriptor {
    /// Shorthand for a nullable column with no key, default or extra.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            key: KeyFlag::None,
            default_value: None,
            extra: String::new(),
        }
    }
}

/// Ordered columns of one table at one endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStructure {
    pub columns: Vec<ColumnDescriptor>,
}

impl TableStructure {
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        Self { columns }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Kind of a table constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintType {
    PrimaryKey,
    ForeignKey,
    Unique,
    /// Anything else the server reports (e.g. CHECK). Synthesis skips these.
    Other(String),
}

impl ConstraintType {
    /// Parse `information_schema.TABLE_CONSTRAINTS.CONSTRAINT_TYPE`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PRIMARY KEY" => ConstraintType::PrimaryKey,
            "FOREIGN KEY" => ConstraintType::ForeignKey,
            "UNIQUE" => ConstraintType::Unique,
            other => ConstraintType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ConstraintType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintType::PrimaryKey => write!(f, "PRIMARY KEY"),
            ConstraintType::ForeignKey => write!(f, "FOREIGN KEY"),
            ConstraintType::Unique => write!(f, "UNIQUE"),
            ConstraintType::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// One column's participation in one constraint.
///
/// A composite key yields several descriptors sharing `name`, in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintDescriptor {
    /// Constraint name.
    pub name: String,

    /// Owning table.
    pub table: String,

    /// Participating column.
    pub column: String,

    /// Constraint kind.
    pub constraint_type: ConstraintType,

    /// Referenced table (foreign keys only).
    pub referenced_table: Option<String>,

    /// Referenced column (foreign keys only).
    pub referenced_column: Option<String>,

    /// ON UPDATE action (foreign keys only).
    pub on_update: Option<String>,

    /// ON DELETE action (foreign keys only).
    pub on_delete: Option<String>,
}

impl ConstraintDescriptor {
    /// Identity of the constraint this descriptor belongs to.
    pub fn identity(&self) -> (&ConstraintType, &str) {
        (&self.constraint_type, self.name.as_str())
    }
}

/// One atomic DDL intent produced by diffing source against target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReconciliationOp {
    /// Replay the source's literal CREATE statement.
    CreateTable { table: String, ddl: String },
    /// Add a column using a synthesized definition.
    AddColumn { table: String, definition: String },
    /// Drop a column by name.
    DropColumn { table: String, column: String },
    /// Add a constraint using synthesized ALTER syntax.
    AddConstraint { table: String, syntax: String },
    /// Drop a constraint using synthesized ALTER syntax.
    DropConstraint { table: String, syntax: String },
}

impl ReconciliationOp {
    /// Table the operation applies to.
    pub fn table(&self) -> &str {
        match self {
            ReconciliationOp::CreateTable { table, .. }
            | ReconciliationOp::AddColumn { table, .. }
            | ReconciliationOp::DropColumn { table, .. }
            | ReconciliationOp::AddConstraint { table, .. }
            | ReconciliationOp::DropConstraint { table, .. } => table,
        }
    }

    /// Short operation kind for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconciliationOp::CreateTable { .. } => "create_table",
            ReconciliationOp::AddColumn { .. } => "add_column",
            ReconciliationOp::DropColumn { .. } => "drop_column",
            ReconciliationOp::AddConstraint { .. } => "add_constraint",
            ReconciliationOp::DropConstraint { .. } => "drop_constraint",
        }
    }
}

impl fmt::Display for ReconciliationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationOp::CreateTable { table, .. } => write!(f, "create table {}", table),
            ReconciliationOp::AddColumn { table, definition } => {
                write!(f, "add column {} on {}", definition, table)
            }
            ReconciliationOp::DropColumn { table, column } => {
                write!(f, "drop column {} on {}", column, table)
            }
            ReconciliationOp::AddConstraint { table, syntax }
            | ReconciliationOp::DropConstraint { table, syntax } => {
                write!(f, "{} on {}", syntax, table)
            }
        }
    }
}
