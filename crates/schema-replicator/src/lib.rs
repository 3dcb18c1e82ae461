//! # schema-replicator
//!
//! MySQL/MariaDB schema replication library.
//!
//! Mirrors the structure of one source server (databases, tables, columns
//! and constraints) onto any number of target servers without touching row
//! data:
//!
//! - **Discovery** of databases and tables, minus system schemas
//! - **Dependency ordering** so referenced tables are created first
//! - **Structure diffing** by column name, with constraint replication
//! - **DDL synthesis** from catalog metadata
//! - **Parallel targets** with per-target fault isolation
//! - **Dry runs** that report the planned DDL
//!
//! ## Example
//!
//! ```rust,no_run
//! use schema_replicator::{Config, Replicator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config/connections.json")?;
//!     let report = Replicator::new(config).run(CancellationToken::new()).await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod core;
pub mod ddl;
pub mod diff;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod ordering;

// Re-exports for convenient access
pub use config::{Config, ConnectionConfig, ReplicationSettings};
pub use connection::{ConnectionDescriptor, ExecutionPolicy};
pub use crate::core::{
    CatalogSnapshot, ColumnDescriptor, ConstraintDescriptor, ConstraintType, DatabaseCatalog,
    Dialect, Endpoint, KeyFlag, MetadataPort, PortFactory, ReconciliationOp, Row,
    TableStructure,
};
pub use drivers::{Dbms, MysqlDialect, MysqlPortFactory};
pub use error::{ReplicateError, Result, TransportError};
pub use orchestrator::{
    DiscoveredDatabase, EndpointHealth, ReplicationReport, Replicator, TargetReport, TargetStatus,
};
