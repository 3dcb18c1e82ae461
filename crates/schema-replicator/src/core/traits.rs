//! Transport-facing traits.
//!
//! - [`MetadataPort`]: executes one statement on one open connection
//! - [`PortFactory`]: opens ports for an endpoint, optionally bound to a database
//! - [`Dialect`]: catalog statement text and row parsing for one engine family
//!
//! Everything above these traits is transport-agnostic; the MySQL
//! implementation lives in `drivers::mysql`, and tests substitute in-memory fakes.

use std::fmt;

use async_trait::async_trait;

use super::schema::{ColumnDescriptor, ConstraintDescriptor};
use super::value::Row;
use crate::drivers::Dbms;
use crate::error::TransportError;

/// Network coordinates and credentials of one endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub dbms: Dbms,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl Endpoint {
    /// `user@host:port`, safe for logs.
    pub fn display_name(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("dbms", &self.dbms)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Execute statements on one exclusively owned connection.
#[async_trait]
pub trait MetadataPort: Send {
    /// Run a statement and return its rows.
    ///
    /// With empty `params` the statement is sent as literal text; otherwise
    /// `?` placeholders are bound positionally.
    async fn execute(
        &mut self,
        statement: &str,
        params: &[&str],
    ) -> std::result::Result<Vec<Row>, TransportError>;

    /// Release the underlying connection. Further calls fail.
    async fn close(&mut self);
}

/// Open metadata ports.
#[async_trait]
pub trait PortFactory: Send + Sync {
    /// Open a connection to `endpoint`, bound to `database` when given.
    async fn open(
        &self,
        endpoint: &Endpoint,
        database: Option<&str>,
    ) -> std::result::Result<Box<dyn MetadataPort>, TransportError>;
}

/// Catalog SQL strategy for one engine family.
///
/// Every statement the connection descriptor issues comes from here, and
/// every row it reads is parsed here.
pub trait Dialect: Send + Sync {
    /// Dialect identifier (e.g., "mysql").
    fn name(&self) -> &str;

    /// Quote an identifier (database, table or column name).
    fn quote_ident(&self, name: &str) -> String;

    /// System-managed databases that are never discovered or replicated.
    fn system_databases(&self) -> &'static [&'static str];

    /// Statement listing every database on the server.
    fn list_databases(&self) -> String;

    /// Statement listing the tables of the bound database.
    fn list_tables(&self) -> String;

    /// Table name from a [`list_tables`](Self::list_tables) row, `None` for views.
    fn parse_table_row(&self, row: &Row) -> Option<String>;

    /// Statement describing the columns of a table.
    fn describe_table(&self, table: &str) -> String;

    fn parse_column_row(&self, row: &Row) -> Option<ColumnDescriptor>;

    /// Statement returning the canonical CREATE text of a table.
    fn show_create_table(&self, table: &str) -> String;

    fn parse_create_row(&self, row: &Row) -> Option<String>;

    /// Parameterized lookup of every constraint a column participates in.
    ///
    /// Parameters: database, table, column.
    fn column_constraints_query(&self) -> &'static str;

    fn parse_constraint_row(&self, row: &Row) -> Option<ConstraintDescriptor>;

    /// Parameterized lookup of `(table, referenced_table)` pairs in one database.
    ///
    /// Parameters: database.
    fn foreign_key_references_query(&self) -> &'static str;

    /// Referenced table names found by scanning CREATE text line by line.
    fn references_from_create_statement(&self, create_statement: &str) -> Vec<String>;

    /// Parameterized lookup of a database's default charset and collation.
    ///
    /// Parameters: database.
    fn database_defaults_query(&self) -> &'static str;

    fn create_database(&self, name: &str, charset: Option<&str>, collation: Option<&str>)
        -> String;

    /// Wrap a clause in `ALTER TABLE`.
    fn alter_table(&self, table: &str, clause: &str) -> String;

    fn add_column(&self, table: &str, definition: &str) -> String {
        self.alter_table(table, &format!("ADD COLUMN {}", definition))
    }

    fn drop_column(&self, table: &str, column: &str) -> String {
        self.alter_table(table, &format!("DROP COLUMN {}", self.quote_ident(column)))
    }

    /// Whether a server error means the database or table does not exist.
    fn is_not_found(&self, err: &TransportError) -> bool;
}
