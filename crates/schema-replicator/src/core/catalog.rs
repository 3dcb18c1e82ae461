//! Catalog bookkeeping.
//!
//! [`DatabaseCatalog`] is the per-connection `database -> ordered tables`
//! sequence. Discovery fills it, ordering rewrites each sequence once, and
//! after that it is only read.
//!
//! [`CatalogSnapshot`] is the frozen copy of the source taken before any target
//! is touched. Target tasks share it read-only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::schema::{ConstraintDescriptor, TableStructure};
use crate::error::{ReplicateError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
struct CatalogEntry {
    database: String,
    tables: Vec<String>,
    ordered: bool,
}

/// Database name -> table sequence, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct DatabaseCatalog {
    entries: Vec<CatalogEntry>,
}

impl DatabaseCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the discovered tables of a database, replacing any earlier
    /// discovery. Fails once the database has been ordered.
    pub fn record_tables(&mut self, database: &str, tables: Vec<String>) -> Result<()> {
        match self.entries.iter_mut().find(|e| e.database == database) {
            Some(entry) if entry.ordered => Err(ReplicateError::Config(format!(
                "tables of database {} were already ordered",
                database
            ))),
            Some(entry) => {
                entry.tables = tables;
                Ok(())
            }
            None => {
                self.entries.push(CatalogEntry {
                    database: database.to_string(),
                    tables,
                    ordered: false,
                });
                Ok(())
            }
        }
    }

    /// Replace a database's sequence with its dependency order.
    ///
    /// `order` must be a permutation of the discovered tables.
    pub fn apply_order(&mut self, database: &str, order: Vec<String>) -> Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.database == database)
            .ok_or_else(|| ReplicateError::not_found("catalog entry", database))?;

        let mut expected = entry.tables.clone();
        let mut given = order.clone();
        expected.sort();
        given.sort();
        if expected != given {
            return Err(ReplicateError::Config(format!(
                "ordering for database {} does not match its discovered tables",
                database
            )));
        }

        entry.tables = order;
        entry.ordered = true;
        Ok(())
    }

    pub fn tables(&self, database: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|e| e.database == database)
            .map(|e| e.tables.as_slice())
    }

    pub fn is_ordered(&self, database: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.database == database && e.ordered)
    }

    pub fn databases(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.database.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Frozen source catalog used by every target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub databases: Vec<DatabaseSnapshot>,
}

impl CatalogSnapshot {
    pub fn table_count(&self) -> usize {
        self.databases.iter().map(|d| d.tables.len()).sum()
    }

    pub fn database(&self, name: &str) -> Option<&DatabaseSnapshot> {
        self.databases.iter().find(|d| d.name == name)
    }
}

/// One source database, tables in dependency order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    pub name: String,
    /// Default character set, if the server reported one.
    pub charset: Option<String>,
    /// Default collation, if the server reported one.
    pub collation: Option<String>,
    pub tables: Vec<TableSnapshot>,
}

/// Everything the differ needs to know about one source table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub name: String,
    /// Literal `CREATE TABLE` text.
    pub create_statement: String,
    pub structure: TableStructure,
    /// Constraints keyed by participating column, for keyed columns only.
    pub constraints: BTreeMap<String, Vec<ConstraintDescriptor>>,
}

impl TableSnapshot {
    /// Constraint descriptors touching `column` (empty if none were recorded).
    pub fn constraints_for(&self, column: &str) -> &[ConstraintDescriptor] {
        self.constraints
            .get(column)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
