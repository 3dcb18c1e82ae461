//! Connection descriptor: one endpoint plus the catalog operations layered
//! on its metadata ports.
//!
//! Ports are opened lazily, one per database touched (plus one server-level
//! port for statements that are not bound to a database), and owned
//! exclusively by the descriptor. Every port error is classified here; no
//! raw [`TransportError`] leaves this module.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, ReplicationSettings};
use crate::core::catalog::DatabaseCatalog;
use crate::core::schema::{ConstraintDescriptor, ReconciliationOp, TableStructure};
use crate::core::traits::{Dialect, Endpoint, MetadataPort, PortFactory};
use crate::core::value::Row;
use crate::error::{ReplicateError, Result, TransportError};

/// Timeout and retry behavior for statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPolicy {
    pub statement_timeout: Duration,
    /// Retries for reads on transient failures. DDL is never retried.
    pub max_retries: u32,
    /// Linear backoff unit: the n-th retry waits `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self::from(&ReplicationSettings::default())
    }
}

impl From<&ReplicationSettings> for ExecutionPolicy {
    fn from(settings: &ReplicationSettings) -> Self {
        Self {
            statement_timeout: settings.statement_timeout(),
            max_retries: settings.max_retries,
            retry_backoff: settings.retry_backoff(),
        }
    }
}

/// One endpoint: credentials, selection and lazily opened ports.
pub struct ConnectionDescriptor {
    label: String,
    endpoint: Endpoint,
    selected_databases: Vec<String>,
    selected_tables: Vec<String>,
    is_source: bool,
    dialect: Arc<dyn Dialect>,
    factory: Arc<dyn PortFactory>,
    policy: ExecutionPolicy,
    /// Keyed by bound database; `None` is the server-level port.
    ports: HashMap<Option<String>, Box<dyn MetadataPort>>,
    catalog: DatabaseCatalog,
}

impl ConnectionDescriptor {
    /// Build a descriptor from its configuration section.
    pub fn from_config(
        config: &ConnectionConfig,
        is_source: bool,
        factory: Arc<dyn PortFactory>,
        policy: ExecutionPolicy,
    ) -> Result<Self> {
        let endpoint = config.endpoint()?;
        Ok(Self {
            label: config.display_label(),
            dialect: endpoint.dbms.dialect(),
            endpoint,
            selected_databases: config.databases.clone(),
            selected_tables: config.tables.clone(),
            is_source,
            factory,
            policy,
            ports: HashMap::new(),
            catalog: DatabaseCatalog::new(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_source(&self) -> bool {
        self.is_source
    }

    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    pub fn catalog(&self) -> &DatabaseCatalog {
        &self.catalog
    }

    /// Whether the database allowlist admits `database` (empty admits all).
    pub fn selects_database(&self, database: &str) -> bool {
        self.selected_databases.is_empty() || self.selected_databases.iter().any(|d| d == database)
    }

    /// Whether the table allowlist admits `table` (empty admits all).
    pub fn selects_table(&self, table: &str) -> bool {
        self.selected_tables.is_empty() || self.selected_tables.iter().any(|t| t == table)
    }

    /// Number of currently open ports.
    pub fn open_ports(&self) -> usize {
        self.ports.len()
    }

    // ===== Discovery =====

    /// Databases on the endpoint, minus system databases, narrowed by the
    /// allowlist.
    ///
    /// With an allowlist the result follows the allowlist's order; otherwise
    /// the server's.
    pub async fn discover_databases(&mut self) -> Result<Vec<String>> {
        let statement = self.dialect.list_databases();
        let rows = self
            .read(None, &statement, &[])
            .await
            .map_err(|e| ReplicateError::transport(format!("listing databases on {}", self.label), e))?;

        let system = self.dialect.system_databases();
        let available: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get(0))
            .filter(|name| !system.iter().any(|s| s.eq_ignore_ascii_case(name)))
            .map(str::to_string)
            .collect();

        let databases = if self.selected_databases.is_empty() {
            available
        } else {
            for wanted in &self.selected_databases {
                if !available.contains(wanted) {
                    return Err(ReplicateError::Config(format!(
                        "Database '{}' selected for {} does not exist",
                        wanted, self.label
                    )));
                }
            }
            self.selected_databases.clone()
        };

        if databases.is_empty() {
            return Err(ReplicateError::Config(format!(
                "No databases to replicate on {}",
                self.label
            )));
        }

        info!("{}: discovered databases: {}", self.label, databases.join(", "));
        Ok(databases)
    }

    /// Base tables of `database`, narrowed by the table allowlist, recorded in
    /// the catalog in discovery order.
    ///
    /// Allowlist entries absent from this database are skipped with a warning
    /// since the allowlist spans every selected database.
    pub async fn discover_tables(&mut self, database: &str) -> Result<Vec<String>> {
        let statement = self.dialect.list_tables();
        let rows = self
            .read(Some(database), &statement, &[])
            .await
            .map_err(|e| self.classify(e, format!("listing tables of {}", database), database, database))?;

        let available: Vec<String> = rows
            .iter()
            .filter_map(|row| self.dialect.parse_table_row(row))
            .collect();

        let tables: Vec<String> = if self.selected_tables.is_empty() {
            available
        } else {
            for wanted in &self.selected_tables {
                if !available.contains(wanted) {
                    warn!(
                        "{}: selected table '{}' does not exist in database {}",
                        self.label, wanted, database
                    );
                }
            }
            available
                .into_iter()
                .filter(|t| self.selected_tables.contains(t))
                .collect()
        };

        if tables.is_empty() {
            return Err(ReplicateError::Config(format!(
                "No tables to replicate in database {} on {}",
                database, self.label
            )));
        }

        debug!("{}: {} tables in {}", self.label, tables.len(), database);
        self.catalog.record_tables(database, tables.clone())?;
        Ok(tables)
    }

    /// Fail if a table allowlist entry matched no discovered database.
    ///
    /// Run after every selected database went through
    /// [`discover_tables`](Self::discover_tables).
    pub fn verify_table_selection(&self) -> Result<()> {
        let unmatched: Vec<&str> = self
            .selected_tables
            .iter()
            .filter(|wanted| {
                !self.catalog.databases().any(|db| {
                    self.catalog
                        .tables(db)
                        .is_some_and(|tables| tables.iter().any(|t| t == *wanted))
                })
            })
            .map(String::as_str)
            .collect();

        if unmatched.is_empty() {
            return Ok(());
        }
        Err(ReplicateError::Config(format!(
            "Table(s) selected for {} exist in no selected database: {}",
            self.label,
            unmatched.join(", ")
        )))
    }

    /// Replace the catalog sequence of `database` with its dependency order.
    pub fn apply_order(&mut self, database: &str, order: Vec<String>) -> Result<()> {
        self.catalog.apply_order(database, order)
    }

    // ===== Description =====

    /// Column structure of a table. [`ReplicateError::NotFound`] when the
    /// table (or its database) does not exist here.
    pub async fn describe_table(&mut self, database: &str, table: &str) -> Result<TableStructure> {
        let statement = self.dialect.describe_table(table);
        let rows = self
            .read(Some(database), &statement, &[])
            .await
            .map_err(|e| self.classify(e, format!("describing {}.{}", database, table), database, table))?;

        let columns: Vec<_> = rows
            .iter()
            .filter_map(|row| self.dialect.parse_column_row(row))
            .collect();
        if columns.is_empty() {
            return Err(ReplicateError::not_found(table, database));
        }
        Ok(TableStructure::new(columns))
    }

    /// Every constraint `column` participates in, with all of each
    /// constraint's columns in ordinal order.
    pub async fn describe_constraints_for_column(
        &mut self,
        database: &str,
        table: &str,
        column: &str,
    ) -> Result<Vec<ConstraintDescriptor>> {
        let statement = self.dialect.column_constraints_query();
        let rows = self
            .read(Some(database), statement, &[database, table, column])
            .await
            .map_err(|e| {
                self.classify(
                    e,
                    format!("reading constraints of {}.{}.{}", database, table, column),
                    database,
                    table,
                )
            })?;

        Ok(rows
            .iter()
            .filter_map(|row| self.dialect.parse_constraint_row(row))
            .collect())
    }

    /// Literal CREATE statement of a table.
    pub async fn show_create_statement(&mut self, database: &str, table: &str) -> Result<String> {
        let statement = self.dialect.show_create_table(table);
        let rows = self
            .read(Some(database), &statement, &[])
            .await
            .map_err(|e| {
                self.classify(e, format!("reading CREATE for {}.{}", database, table), database, table)
            })?;

        rows.first()
            .and_then(|row| self.dialect.parse_create_row(row))
            .ok_or_else(|| ReplicateError::not_found(table, database))
    }

    /// Tables referenced by each of `tables` through foreign keys.
    ///
    /// Uses the structured catalog view; if that lookup fails, falls back to
    /// scanning each table's CREATE statement.
    pub async fn foreign_key_references(
        &mut self,
        database: &str,
        tables: &[String],
    ) -> Result<HashMap<String, Vec<String>>> {
        let statement = self.dialect.foreign_key_references_query();
        match self.read(Some(database), statement, &[database]).await {
            Ok(rows) => {
                let mut references: HashMap<String, Vec<String>> = HashMap::new();
                for row in &rows {
                    let (Some(table), Some(referenced)) =
                        (row.get_by_name("TABLE_NAME"), row.get_by_name("REFERENCED_TABLE_NAME"))
                    else {
                        continue;
                    };
                    let entry = references.entry(table.to_string()).or_default();
                    if !entry.iter().any(|r| r == referenced) {
                        entry.push(referenced.to_string());
                    }
                }
                Ok(references)
            }
            Err(e) => {
                warn!(
                    "{}: structured foreign key lookup failed for {} ({}), scanning CREATE statements",
                    self.label, database, e
                );
                let mut references = HashMap::new();
                for table in tables {
                    let ddl = self.show_create_statement(database, table).await?;
                    references.insert(
                        table.clone(),
                        self.dialect.references_from_create_statement(&ddl),
                    );
                }
                Ok(references)
            }
        }
    }

    /// Default character set and collation of a database.
    ///
    /// Best effort: a failed lookup yields `(None, None)` and the target
    /// falls back to its server defaults.
    pub async fn database_defaults(&mut self, database: &str) -> (Option<String>, Option<String>) {
        let statement = self.dialect.database_defaults_query();
        match self.read(None, statement, &[database]).await {
            Ok(rows) => match rows.first() {
                Some(row) => (
                    row.get_by_name("CHARSET_NAME").map(str::to_string),
                    row.get_by_name("COLLATION_NAME").map(str::to_string),
                ),
                None => (None, None),
            },
            Err(e) => {
                warn!("{}: could not read defaults of {}: {}", self.label, database, e);
                (None, None)
            }
        }
    }

    // ===== Mutation =====

    /// `CREATE DATABASE IF NOT EXISTS`, replaying the source's defaults.
    pub async fn create_database(
        &mut self,
        database: &str,
        charset: Option<&str>,
        collation: Option<&str>,
    ) -> Result<()> {
        let statement = self.dialect.create_database(database, charset, collation);
        self.ddl(None, format!("create database {}", database), &statement)
            .await
    }

    /// Replay a literal CREATE TABLE statement.
    pub async fn create_table(&mut self, database: &str, table: &str, ddl: &str) -> Result<()> {
        self.ddl(Some(database), format!("create table {}.{}", database, table), ddl)
            .await
    }

    pub async fn add_column(&mut self, database: &str, table: &str, definition: &str) -> Result<()> {
        let statement = self.dialect.add_column(table, definition);
        self.ddl(
            Some(database),
            format!("add column {} on {}.{}", definition, database, table),
            &statement,
        )
        .await
    }

    pub async fn drop_column(&mut self, database: &str, table: &str, column: &str) -> Result<()> {
        let statement = self.dialect.drop_column(table, column);
        self.ddl(
            Some(database),
            format!("drop column {} on {}.{}", column, database, table),
            &statement,
        )
        .await
    }

    /// Apply an `ADD ...` or `DROP ...` constraint clause.
    pub async fn modify_constraint(&mut self, database: &str, table: &str, syntax: &str) -> Result<()> {
        let statement = self.dialect.alter_table(table, syntax);
        self.ddl(
            Some(database),
            format!("{} on {}.{}", syntax, database, table),
            &statement,
        )
        .await
    }

    /// Apply one reconciliation operation to `database`.
    pub async fn apply(&mut self, database: &str, op: &ReconciliationOp) -> Result<()> {
        match op {
            ReconciliationOp::CreateTable { table, ddl } => {
                self.create_table(database, table, ddl).await
            }
            ReconciliationOp::AddColumn { table, definition } => {
                self.add_column(database, table, definition).await
            }
            ReconciliationOp::DropColumn { table, column } => {
                self.drop_column(database, table, column).await
            }
            ReconciliationOp::AddConstraint { table, syntax }
            | ReconciliationOp::DropConstraint { table, syntax } => {
                self.modify_constraint(database, table, syntax).await
            }
        }
    }

    // ===== Lifecycle =====

    /// Close the port bound to `database`, if one is open.
    pub async fn release_database(&mut self, database: &str) {
        if let Some(mut port) = self.ports.remove(&Some(database.to_string())) {
            port.close().await;
            debug!("{}: released connection to {}", self.label, database);
        }
    }

    /// Close every open port.
    pub async fn close(&mut self) {
        for (_, mut port) in self.ports.drain() {
            port.close().await;
        }
    }

    /// Open (or reuse) the server-level port and run a trivial statement.
    pub async fn ping(&mut self) -> Result<Duration> {
        let started = std::time::Instant::now();
        self.read(None, "SELECT 1", &[])
            .await
            .map_err(|e| ReplicateError::transport(format!("pinging {}", self.label), e))?;
        Ok(started.elapsed())
    }

    // ===== Internals =====

    fn classify(
        &self,
        err: TransportError,
        context: String,
        database: &str,
        object: &str,
    ) -> ReplicateError {
        if self.dialect.is_not_found(&err) {
            ReplicateError::not_found(object, database)
        } else {
            ReplicateError::transport(format!("{} on {}", context, self.label), err)
        }
    }

    /// Run a read statement with timeout and bounded retry.
    async fn read(
        &mut self,
        database: Option<&str>,
        statement: &str,
        params: &[&str],
    ) -> std::result::Result<Vec<Row>, TransportError> {
        let mut retries = 0;
        loop {
            match self.execute_once(database, statement, params).await {
                Ok(rows) => return Ok(rows),
                Err(e) if e.is_transient() && retries < self.policy.max_retries => {
                    retries += 1;
                    warn!(
                        "{}: transient failure ({}), retry {}/{}",
                        self.label, e, retries, self.policy.max_retries
                    );
                    // The connection may be unusable; reopen on the next attempt
                    self.discard_port(database).await;
                    tokio::time::sleep(self.policy.retry_backoff * retries).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run a DDL statement once. Any failure is an apply error.
    async fn ddl(&mut self, database: Option<&str>, operation: String, statement: &str) -> Result<()> {
        if self.is_source {
            return Err(ReplicateError::apply(
                operation,
                format!("{} is the replication source and is never modified", self.label),
            ));
        }

        match self.execute_once(database, statement, &[]).await {
            Ok(_) => {
                info!("{}: {}", self.label, operation);
                Ok(())
            }
            Err(e) => {
                if e.is_transient() {
                    self.discard_port(database).await;
                }
                Err(ReplicateError::apply(operation, e.to_string()))
            }
        }
    }

    async fn execute_once(
        &mut self,
        database: Option<&str>,
        statement: &str,
        params: &[&str],
    ) -> std::result::Result<Vec<Row>, TransportError> {
        let timeout = self.policy.statement_timeout;
        let port = self.port(database).await?;
        match tokio::time::timeout(timeout, port.execute(statement, params)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    async fn port(
        &mut self,
        database: Option<&str>,
    ) -> std::result::Result<&mut Box<dyn MetadataPort>, TransportError> {
        use std::collections::hash_map::Entry;

        match self.ports.entry(database.map(str::to_string)) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let timeout = self.policy.statement_timeout;
                let port = tokio::time::timeout(timeout, self.factory.open(&self.endpoint, database))
                    .await
                    .map_err(|_| TransportError::Timeout(timeout))??;
                Ok(entry.insert(port))
            }
        }
    }

    async fn discard_port(&mut self, database: Option<&str>) {
        if let Some(mut port) = self.ports.remove(&database.map(str::to_string)) {
            port.close().await;
        }
    }
}

impl std::fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("label", &self.label)
            .field("endpoint", &self.endpoint)
            .field("selected_databases", &self.selected_databases)
            .field("selected_tables", &self.selected_tables)
            .field("is_source", &self.is_source)
            .field("open_ports", &self.ports.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type Reply = std::result::Result<Vec<Row>, TransportError>;

    /// Answers statements from a script; unscripted statements return no rows.
    #[derive(Default)]
    struct Script {
        replies: Mutex<HashMap<String, VecDeque<Reply>>>,
        /// Stalls before answering, consumed one per execution.
        delays: Mutex<HashMap<String, VecDeque<Duration>>>,
        log: Mutex<Vec<(Option<String>, String, Vec<String>)>>,
        opened: Mutex<usize>,
        closed: Mutex<usize>,
    }

    impl Script {
        fn reply(&self, statement: &str, reply: Reply) {
            self.replies
                .lock()
                .unwrap()
                .entry(statement.to_string())
                .or_default()
                .push_back(reply);
        }

        fn stall(&self, statement: &str, delay: Duration) {
            self.delays
                .lock()
                .unwrap()
                .entry(statement.to_string())
                .or_default()
                .push_back(delay);
        }

        fn statements(&self) -> Vec<String> {
            self.log.lock().unwrap().iter().map(|(_, s, _)| s.clone()).collect()
        }
    }

    struct ScriptPort {
        database: Option<String>,
        script: Arc<Script>,
    }

    #[async_trait]
    impl MetadataPort for ScriptPort {
        async fn execute(&mut self, statement: &str, params: &[&str]) -> Reply {
            self.script.log.lock().unwrap().push((
                self.database.clone(),
                statement.to_string(),
                params.iter().map(|p| p.to_string()).collect(),
            ));
            let delay = self
                .script
                .delays
                .lock()
                .unwrap()
                .get_mut(statement)
                .and_then(|q| q.pop_front());
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let mut replies = self.script.replies.lock().unwrap();
            match replies.get_mut(statement).and_then(|q| q.pop_front()) {
                Some(reply) => reply,
                None => Ok(vec![]),
            }
        }

        async fn close(&mut self) {
            *self.script.closed.lock().unwrap() += 1;
        }
    }

    struct ScriptFactory(Arc<Script>);

    #[async_trait]
    impl PortFactory for ScriptFactory {
        async fn open(
            &self,
            _endpoint: &Endpoint,
            database: Option<&str>,
        ) -> std::result::Result<Box<dyn MetadataPort>, TransportError> {
            *self.0.opened.lock().unwrap() += 1;
            Ok(Box::new(ScriptPort {
                database: database.map(str::to_string),
                script: Arc::clone(&self.0),
            }))
        }
    }

    fn config(databases: &[&str], tables: &[&str]) -> ConnectionConfig {
        ConnectionConfig {
            label: Some("test".into()),
            host: "localhost".into(),
            port: 3306,
            user: "root".into(),
            password: String::new(),
            databases: databases.iter().map(|s| s.to_string()).collect(),
            tables: tables.iter().map(|s| s.to_string()).collect(),
            dbms: "mysql".into(),
        }
    }

    fn descriptor(script: &Arc<Script>, databases: &[&str], tables: &[&str]) -> ConnectionDescriptor {
        let policy = ExecutionPolicy {
            statement_timeout: Duration::from_secs(5),
            max_retries: 2,
            retry_backoff: Duration::from_millis(1),
        };
        descriptor_with_policy(script, databases, tables, policy)
    }

    fn descriptor_with_policy(
        script: &Arc<Script>,
        databases: &[&str],
        tables: &[&str],
        policy: ExecutionPolicy,
    ) -> ConnectionDescriptor {
        ConnectionDescriptor::from_config(
            &config(databases, tables),
            false,
            Arc::new(ScriptFactory(Arc::clone(script))),
            policy,
        )
        .unwrap()
    }

    fn single_column(header: &str, values: &[&str]) -> Vec<Row> {
        values
            .iter()
            .map(|v| Row::from_pairs([(header, Some(*v))]))
            .collect()
    }

    fn table_rows(tables: &[(&str, &str)]) -> Vec<Row> {
        tables
            .iter()
            .map(|(name, kind)| Row::from_pairs([("Tables_in_db", Some(*name)), ("Table_type", Some(*kind))]))
            .collect()
    }

    fn server_databases() -> Vec<Row> {
        single_column(
            "Database",
            &["information_schema", "mysql", "shop", "sys", "billing", "performance_schema"],
        )
    }

    #[tokio::test]
    async fn test_discover_databases_excludes_system() {
        let script = Arc::new(Script::default());
        script.reply("SHOW DATABASES", Ok(server_databases()));

        let mut conn = descriptor(&script, &[], &[]);
        let databases = conn.discover_databases().await.unwrap();
        assert_eq!(databases, vec!["shop", "billing"]);
    }

    #[tokio::test]
    async fn test_discover_databases_intersects_allowlist() {
        let script = Arc::new(Script::default());
        script.reply("SHOW DATABASES", Ok(server_databases()));

        let mut conn = descriptor(&script, &["billing"], &[]);
        assert_eq!(conn.discover_databases().await.unwrap(), vec!["billing"]);
    }

    #[tokio::test]
    async fn test_discover_databases_missing_allowlist_entry() {
        let script = Arc::new(Script::default());
        script.reply("SHOW DATABASES", Ok(server_databases()));

        let mut conn = descriptor(&script, &["shop", "crm"], &[]);
        let err = conn.discover_databases().await.unwrap_err();
        assert!(matches!(err, ReplicateError::Config(_)));
        assert!(err.to_string().contains("crm"));
    }

    #[tokio::test]
    async fn test_discover_databases_system_database_not_selectable() {
        let script = Arc::new(Script::default());
        script.reply("SHOW DATABASES", Ok(server_databases()));

        let mut conn = descriptor(&script, &["mysql"], &[]);
        assert!(matches!(
            conn.discover_databases().await,
            Err(ReplicateError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_discover_databases_empty_is_config_error() {
        let script = Arc::new(Script::default());
        script.reply("SHOW DATABASES", Ok(single_column("Database", &["mysql", "sys"])));

        let mut conn = descriptor(&script, &[], &[]);
        assert!(matches!(
            conn.discover_databases().await,
            Err(ReplicateError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_discover_tables_skips_views_and_records_catalog() {
        let script = Arc::new(Script::default());
        script.reply(
            "SHOW FULL TABLES",
            Ok(table_rows(&[
                ("orders", "BASE TABLE"),
                ("order_totals", "VIEW"),
                ("order_items", "BASE TABLE"),
            ])),
        );

        let mut conn = descriptor(&script, &[], &[]);
        let tables = conn.discover_tables("shop").await.unwrap();
        assert_eq!(tables, vec!["orders", "order_items"]);
        assert_eq!(
            conn.catalog().tables("shop").unwrap(),
            &["orders".to_string(), "order_items".to_string()]
        );
    }

    #[tokio::test]
    async fn test_discover_tables_allowlist() {
        let script = Arc::new(Script::default());
        script.reply(
            "SHOW FULL TABLES",
            Ok(table_rows(&[("orders", "BASE TABLE"), ("order_items", "BASE TABLE")])),
        );
        script.reply("SHOW FULL TABLES", Ok(table_rows(&[("orders", "BASE TABLE")])));

        let mut conn = descriptor(&script, &[], &["order_items", "invoices"]);
        assert_eq!(conn.discover_tables("shop").await.unwrap(), vec!["order_items"]);

        let err = conn.discover_tables("archive").await.unwrap_err();
        assert!(matches!(err, ReplicateError::Config(_)));
    }

    #[tokio::test]
    async fn test_describe_table_not_found() {
        let script = Arc::new(Script::default());
        script.reply(
            "SHOW COLUMNS FROM `ghost`",
            Err(TransportError::Server {
                code: 1146,
                message: "Table 'shop.ghost' doesn't exist".into(),
            }),
        );

        let mut conn = descriptor(&script, &[], &[]);
        let err = conn.describe_table("shop", "ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_describe_table_server_error_is_transport() {
        let script = Arc::new(Script::default());
        script.reply(
            "SHOW COLUMNS FROM `orders`",
            Err(TransportError::Server {
                code: 1142,
                message: "SELECT command denied".into(),
            }),
        );

        let mut conn = descriptor(&script, &[], &[]);
        let err = conn.describe_table("shop", "orders").await.unwrap_err();
        assert!(matches!(err, ReplicateError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_describe_table_parses_columns() {
        let script = Arc::new(Script::default());
        script.reply(
            "SHOW COLUMNS FROM `orders`",
            Ok(vec![Row::from_pairs([
                ("Field", Some("id")),
                ("Type", Some("int")),
                ("Null", Some("NO")),
                ("Key", Some("PRI")),
                ("Default", None),
                ("Extra", Some("auto_increment")),
            ])]),
        );

        let mut conn = descriptor(&script, &[], &[]);
        let structure = conn.describe_table("shop", "orders").await.unwrap();
        assert_eq!(structure.columns.len(), 1);
        assert!(!structure.columns[0].nullable);
    }

    #[tokio::test]
    async fn test_reads_retry_transient_failures() {
        let script = Arc::new(Script::default());
        script.reply("SHOW DATABASES", Err(TransportError::Connection("reset".into())));
        script.reply("SHOW DATABASES", Err(TransportError::Connection("reset".into())));
        script.reply("SHOW DATABASES", Ok(server_databases()));

        let mut conn = descriptor(&script, &[], &[]);
        assert!(conn.discover_databases().await.is_ok());
        // Every failed attempt discards its port and reopens
        assert_eq!(*script.opened.lock().unwrap(), 3);
        assert_eq!(*script.closed.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reads_give_up_after_max_retries() {
        let script = Arc::new(Script::default());
        for _ in 0..3 {
            script.reply("SHOW DATABASES", Err(TransportError::Connection("reset".into())));
        }

        let mut conn = descriptor(&script, &[], &[]);
        let err = conn.discover_databases().await.unwrap_err();
        assert!(matches!(err, ReplicateError::Transport { .. }));
        assert_eq!(script.statements().len(), 3);
    }

    fn short_timeout() -> ExecutionPolicy {
        ExecutionPolicy {
            statement_timeout: Duration::from_millis(10),
            max_retries: 2,
            retry_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_slow_read_times_out_and_is_retried() {
        let script = Arc::new(Script::default());
        script.stall("SHOW DATABASES", Duration::from_millis(500));
        script.reply("SHOW DATABASES", Ok(server_databases()));

        let mut conn = descriptor_with_policy(&script, &[], &[], short_timeout());
        let databases = conn.discover_databases().await.unwrap();
        assert_eq!(databases, vec!["shop", "billing"]);
        assert_eq!(script.statements().len(), 2);
        // The timed-out port is discarded and a fresh one opened
        assert_eq!(*script.opened.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_read_timeouts_exhaust_retries() {
        let script = Arc::new(Script::default());
        for _ in 0..3 {
            script.stall("SHOW DATABASES", Duration::from_millis(500));
        }

        let mut conn = descriptor_with_policy(&script, &[], &[], short_timeout());
        let err = conn.discover_databases().await.unwrap_err();
        assert!(matches!(
            err,
            ReplicateError::Transport {
                source: TransportError::Timeout(_),
                ..
            }
        ));
        assert_eq!(script.statements().len(), 3);
    }

    #[tokio::test]
    async fn test_ddl_is_not_retried() {
        let script = Arc::new(Script::default());
        let statement = "ALTER TABLE `orders` DROP COLUMN `legacy`";
        script.reply(statement, Err(TransportError::Connection("reset".into())));

        let mut conn = descriptor(&script, &[], &[]);
        let err = conn.drop_column("shop", "orders", "legacy").await.unwrap_err();
        assert!(matches!(err, ReplicateError::Apply { .. }));
        assert_eq!(script.statements(), vec![statement.to_string()]);
    }

    #[tokio::test]
    async fn test_source_is_never_modified() {
        let script = Arc::new(Script::default());
        let mut conn = ConnectionDescriptor::from_config(
            &config(&[], &[]),
            true,
            Arc::new(ScriptFactory(Arc::clone(&script))),
            ExecutionPolicy::default(),
        )
        .unwrap();

        let err = conn.create_database("shop", None, None).await.unwrap_err();
        assert!(matches!(err, ReplicateError::Apply { .. }));
        assert!(script.statements().is_empty());
    }

    #[tokio::test]
    async fn test_apply_dispatches_to_alter_table() {
        let script = Arc::new(Script::default());
        let mut conn = descriptor(&script, &[], &[]);

        let ops = vec![
            ReconciliationOp::AddColumn {
                table: "orders".into(),
                definition: "note text".into(),
            },
            ReconciliationOp::AddConstraint {
                table: "orders".into(),
                syntax: "ADD PRIMARY KEY (id)".into(),
            },
            ReconciliationOp::CreateTable {
                table: "lines".into(),
                ddl: "CREATE TABLE `lines` (id int)".into(),
            },
        ];
        for op in &ops {
            conn.apply("shop", op).await.unwrap();
        }

        assert_eq!(
            script.statements(),
            vec![
                "ALTER TABLE `orders` ADD COLUMN note text",
                "ALTER TABLE `orders` ADD PRIMARY KEY (id)",
                "CREATE TABLE `lines` (id int)",
            ]
        );
        let log = script.log.lock().unwrap();
        assert!(log.iter().all(|(db, _, _)| db.as_deref() == Some("shop")));
    }

    #[tokio::test]
    async fn test_constraint_lookup_binds_parameters() {
        let script = Arc::new(Script::default());
        let mut conn = descriptor(&script, &[], &[]);
        let query = conn.dialect().column_constraints_query();
        script.reply(
            query,
            Ok(vec![Row::from_pairs([
                ("CONSTRAINT_NAME", Some("fk_1")),
                ("TABLE_NAME", Some("order_items")),
                ("COLUMN_NAME", Some("order_id")),
                ("CONSTRAINT_TYPE", Some("FOREIGN KEY")),
                ("REFERENCED_TABLE_NAME", Some("orders")),
                ("REFERENCED_COLUMN_NAME", Some("id")),
                ("UPDATE_RULE", Some("NO ACTION")),
                ("DELETE_RULE", Some("CASCADE")),
            ])]),
        );

        let constraints = conn
            .describe_constraints_for_column("shop", "order_items", "order_id")
            .await
            .unwrap();
        assert_eq!(constraints.len(), 1);
        assert_eq!(constraints[0].referenced_table.as_deref(), Some("orders"));

        let log = script.log.lock().unwrap();
        assert_eq!(log[0].2, vec!["shop", "order_items", "order_id"]);
    }

    #[tokio::test]
    async fn test_foreign_key_references_fall_back_to_create_scan() {
        let script = Arc::new(Script::default());
        let mut conn = descriptor(&script, &[], &[]);
        let query = conn.dialect().foreign_key_references_query();
        script.reply(
            query,
            Err(TransportError::Server {
                code: 1142,
                message: "denied".into(),
            }),
        );
        script.reply(
            "SHOW CREATE TABLE `order_items`",
            Ok(vec![Row::from_pairs([
                ("Table", Some("order_items")),
                (
                    "Create Table",
                    Some("CREATE TABLE `order_items` (\n  `order_id` int,\n  CONSTRAINT `fk_1` FOREIGN KEY (`order_id`) REFERENCES `orders` (`id`)\n)"),
                ),
            ])]),
        );
        script.reply(
            "SHOW CREATE TABLE `orders`",
            Ok(vec![Row::from_pairs([
                ("Table", Some("orders")),
                ("Create Table", Some("CREATE TABLE `orders` (\n  `id` int\n)")),
            ])]),
        );

        let tables = vec!["order_items".to_string(), "orders".to_string()];
        let references = conn.foreign_key_references("shop", &tables).await.unwrap();
        assert_eq!(references["order_items"], vec!["orders"]);
        assert!(references["orders"].is_empty());
    }

    #[tokio::test]
    async fn test_release_and_close_ports() {
        let script = Arc::new(Script::default());
        let mut conn = descriptor(&script, &[], &[]);

        conn.describe_table("shop", "orders").await.ok();
        conn.describe_table("billing", "invoices").await.ok();
        assert_eq!(conn.open_ports(), 2);

        conn.release_database("shop").await;
        assert_eq!(conn.open_ports(), 1);

        conn.close().await;
        assert_eq!(conn.open_ports(), 0);
        assert_eq!(*script.closed.lock().unwrap(), 2);
    }
}
