//! Core abstractions shared by every component.
//!
//! - [`schema`]: column, constraint, table and reconciliation-operation types
//! - [`catalog`]: per-connection table ordering and the frozen source snapshot
//! - [`traits`]: the metadata port and port factory seams
//! - [`value`]: rows returned by a port

pub mod catalog;
pub mod schema;
pub mod traits;
pub mod value;

pub use catalog::{CatalogSnapshot, DatabaseCatalog, DatabaseSnapshot, TableSnapshot};
pub use schema::{
    ColumnDescriptor, ConstraintDescriptor, ConstraintType, KeyFlag, ReconciliationOp,
    TableStructure,
};
pub use traits::{Dialect, Endpoint, MetadataPort, PortFactory};
pub use value::Row;
