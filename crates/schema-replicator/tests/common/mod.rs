//! In-memory MySQL stand-in for integration tests.
//!
//! A [`FakeCluster`] holds one [`FakeServer`] per host and implements
//! [`PortFactory`]. Ports answer the catalog statements the MySQL dialect
//! issues, apply DDL to the in-memory catalog, and log every statement.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use schema_replicator::{
    ColumnDescriptor, Config, ConstraintDescriptor, ConstraintType, Endpoint, KeyFlag,
    MetadataPort, PortFactory, Row, TransportError,
};

#[derive(Debug, Clone, Default)]
pub struct FakeTable {
    pub columns: Vec<ColumnDescriptor>,
    pub create_statement: String,
    pub constraints: Vec<ConstraintDescriptor>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeDatabase {
    pub charset: Option<String>,
    pub collation: Option<String>,
    /// Tables in creation order.
    pub tables: Vec<(String, FakeTable)>,
}

impl FakeDatabase {
    fn table(&self, name: &str) -> Option<&FakeTable> {
        self.tables.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    fn table_mut(&mut self, name: &str) -> Option<&mut FakeTable> {
        self.tables
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }
}

/// One executed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed {
    pub database: Option<String>,
    pub statement: String,
}

#[derive(Debug, Default)]
pub struct FakeServer {
    pub databases: BTreeMap<String, FakeDatabase>,
    pub log: Vec<Executed>,
    /// Statements containing the pattern fail with the error.
    pub failures: Vec<(String, TransportError)>,
    /// Cancel the token once a statement containing the pattern succeeds.
    pub cancel_after: Option<(String, CancellationToken)>,
}

impl FakeServer {
    /// Statements that change the catalog, in execution order.
    pub fn ddl(&self) -> Vec<String> {
        self.log
            .iter()
            .map(|e| e.statement.clone())
            .filter(|s| s.starts_with("CREATE") || s.starts_with("ALTER"))
            .collect()
    }
}

/// Hosts -> servers.
#[derive(Default)]
pub struct FakeCluster {
    servers: Mutex<HashMap<String, Arc<Mutex<FakeServer>>>>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_server(&self, host: &str, server: FakeServer) -> Arc<Mutex<FakeServer>> {
        let server = Arc::new(Mutex::new(server));
        self.servers
            .lock()
            .unwrap()
            .insert(host.to_string(), Arc::clone(&server));
        server
    }

    fn server(&self, host: &str) -> Option<Arc<Mutex<FakeServer>>> {
        self.servers.lock().unwrap().get(host).cloned()
    }

    /// Table whose CREATE text is `ddl` on any server, used to give tables
    /// created through replayed DDL their real structure.
    fn table_for_ddl(&self, ddl: &str) -> Option<FakeTable> {
        let servers: Vec<_> = self.servers.lock().unwrap().values().cloned().collect();
        servers.iter().find_map(|server| {
            let server = server.lock().unwrap();
            server
                .databases
                .values()
                .flat_map(|db| db.tables.iter())
                .find(|(_, t)| t.create_statement == ddl)
                .map(|(_, t)| t.clone())
        })
    }
}

/// Factory handle; `Arc<FakeCluster>` cannot implement the trait directly
/// in a test crate without a newtype.
pub struct FakeFactory(pub Arc<FakeCluster>);

#[async_trait]
impl PortFactory for FakeFactory {
    async fn open(
        &self,
        endpoint: &Endpoint,
        database: Option<&str>,
    ) -> Result<Box<dyn MetadataPort>, TransportError> {
        let server = self.0.server(&endpoint.host).ok_or_else(|| {
            TransportError::Connection(format!("Can't connect to MySQL server on '{}'", endpoint.host))
        })?;

        if let Some(db) = database {
            if !server.lock().unwrap().databases.contains_key(db) {
                return Err(unknown_database(db));
            }
        }

        Ok(Box::new(FakePort {
            cluster: Arc::clone(&self.0),
            server,
            database: database.map(str::to_string),
        }))
    }
}

struct FakePort {
    cluster: Arc<FakeCluster>,
    server: Arc<Mutex<FakeServer>>,
    database: Option<String>,
}

#[async_trait]
impl MetadataPort for FakePort {
    async fn execute(&mut self, statement: &str, params: &[&str]) -> Result<Vec<Row>, TransportError> {
        let statement = statement.trim();

        // Looked up before locking this server: the cluster may lock it too
        let template = if statement.starts_with("CREATE TABLE") {
            self.cluster.table_for_ddl(statement)
        } else {
            None
        };

        let mut server = self.server.lock().unwrap();
        server.log.push(Executed {
            database: self.database.clone(),
            statement: statement.to_string(),
        });
        if let Some((_, err)) = server
            .failures
            .iter()
            .find(|(pattern, _)| statement.contains(pattern.as_str()))
        {
            return Err(err.clone());
        }

        let result = handle(&mut server, self.database.as_deref(), statement, params, template);
        if let (Ok(_), Some((pattern, token))) = (&result, &server.cancel_after) {
            if statement.contains(pattern.as_str()) {
                token.cancel();
            }
        }
        result
    }

    async fn close(&mut self) {}
}

fn handle(
    server: &mut FakeServer,
    bound: Option<&str>,
    statement: &str,
    params: &[&str],
    template: Option<FakeTable>,
) -> Result<Vec<Row>, TransportError> {
    if statement == "SELECT 1" {
        return Ok(vec![Row::from_pairs([("1", Some("1"))])]);
    }

    if statement == "SHOW DATABASES" {
        let system = ["information_schema", "mysql", "performance_schema", "sys"];
        return Ok(system
            .iter()
            .map(|s| s.to_string())
            .chain(server.databases.keys().cloned())
            .map(|name| Row::from_pairs([("Database", Some(name))]))
            .collect());
    }

    if statement.contains("INFORMATION_SCHEMA.SCHEMATA") {
        return Ok(server
            .databases
            .get(params[0])
            .map(|db| {
                vec![Row::from_pairs([
                    ("CHARSET_NAME", db.charset.clone()),
                    ("COLLATION_NAME", db.collation.clone()),
                ])]
            })
            .unwrap_or_default());
    }

    if let Some(rest) = statement.strip_prefix("CREATE DATABASE IF NOT EXISTS ") {
        let (name, _) = ident(rest);
        server.databases.entry(name).or_default();
        return Ok(vec![]);
    }

    let db_name = bound.ok_or_else(|| TransportError::Server {
        code: 1046,
        message: "No database selected".into(),
    })?;
    let db = server
        .databases
        .get_mut(db_name)
        .ok_or_else(|| unknown_database(db_name))?;

    if statement == "SHOW FULL TABLES" {
        return Ok(db
            .tables
            .iter()
            .map(|(name, _)| {
                Row::from_pairs([
                    (format!("Tables_in_{}", db_name), Some(name.clone())),
                    ("Table_type".to_string(), Some("BASE TABLE".to_string())),
                ])
            })
            .collect());
    }

    if let Some(rest) = statement.strip_prefix("SHOW COLUMNS FROM ") {
        let (table, _) = ident(rest);
        let table = db.table(&table).ok_or_else(|| no_such_table(db_name, &table))?;
        return Ok(table.columns.iter().map(column_row).collect());
    }

    if let Some(rest) = statement.strip_prefix("SHOW CREATE TABLE ") {
        let (name, _) = ident(rest);
        let table = db.table(&name).ok_or_else(|| no_such_table(db_name, &name))?;
        return Ok(vec![Row::from_pairs([
            ("Table", Some(name.clone())),
            ("Create Table", Some(table.create_statement.clone())),
        ])]);
    }

    if statement.contains("KEY_COLUMN_USAGE owner") {
        let (table, column) = (params[1], params[2]);
        let Some(table) = db.table(table) else {
            return Ok(vec![]);
        };
        let names: Vec<&str> = table
            .constraints
            .iter()
            .filter(|c| c.column == column)
            .map(|c| c.name.as_str())
            .collect();
        return Ok(table
            .constraints
            .iter()
            .filter(|c| names.contains(&c.name.as_str()))
            .map(constraint_row)
            .collect());
    }

    if statement.contains("REFERENCED_TABLE_SCHEMA = TABLE_SCHEMA") {
        let mut rows = Vec::new();
        for (name, table) in &db.tables {
            for c in &table.constraints {
                if let Some(referenced) = &c.referenced_table {
                    rows.push(Row::from_pairs([
                        ("TABLE_NAME", Some(name.clone())),
                        ("REFERENCED_TABLE_NAME", Some(referenced.clone())),
                    ]));
                }
            }
        }
        return Ok(rows);
    }

    if statement.starts_with("CREATE TABLE ") {
        let (name, _) = ident(&statement["CREATE TABLE ".len()..]);
        if db.table(&name).is_some() {
            return Err(TransportError::Server {
                code: 1050,
                message: format!("Table '{}' already exists", name),
            });
        }
        let mut table = template.unwrap_or_default();
        table.create_statement = statement.to_string();
        db.tables.push((name, table));
        return Ok(vec![]);
    }

    if let Some(rest) = statement.strip_prefix("ALTER TABLE ") {
        let (name, clause) = ident(rest);
        let table = db
            .table_mut(&name)
            .ok_or_else(|| no_such_table(db_name, &name))?;
        alter(table, clause.trim());
        return Ok(vec![]);
    }

    Err(TransportError::Server {
        code: 1064,
        message: format!("You have an error in your SQL syntax near '{}'", statement),
    })
}

fn alter(table: &mut FakeTable, clause: &str) {
    if let Some(definition) = clause.strip_prefix("ADD COLUMN ") {
        let (name, rest) = ident(definition);
        let data_type = rest.split_whitespace().next().unwrap_or_default().to_string();
        table.columns.push(ColumnDescriptor {
            nullable: !definition.contains("NOT NULL"),
            ..ColumnDescriptor::new(name, data_type)
        });
    } else if let Some(column) = clause.strip_prefix("DROP COLUMN ") {
        let (column, _) = ident(column);
        table.columns.retain(|c| c.name != column);
    } else if let Some(index) = clause.strip_prefix("DROP INDEX ") {
        let index = index.trim();
        table.constraints.retain(|c| c.name != index);
    } else if let Some(fk) = clause.strip_prefix("DROP FOREIGN KEY ") {
        let fk = fk.trim();
        table.constraints.retain(|c| c.name != fk);
    }
}

/// Leading identifier, backtick-quoted or bare, and the remainder.
fn ident(input: &str) -> (String, &str) {
    let input = input.trim_start();
    if let Some(quoted) = input.strip_prefix('`') {
        match quoted.find('`') {
            Some(end) => (quoted[..end].to_string(), &quoted[end + 1..]),
            None => (quoted.to_string(), ""),
        }
    } else {
        let end = input
            .find(|c: char| c.is_whitespace() || c == '(')
            .unwrap_or(input.len());
        (input[..end].to_string(), &input[end..])
    }
}

fn unknown_database(db: &str) -> TransportError {
    TransportError::Server {
        code: 1049,
        message: format!("Unknown database '{}'", db),
    }
}

fn no_such_table(db: &str, table: &str) -> TransportError {
    TransportError::Server {
        code: 1146,
        message: format!("Table '{}.{}' doesn't exist", db, table),
    }
}

fn column_row(c: &ColumnDescriptor) -> Row {
    let key = match c.key {
        KeyFlag::None => "",
        KeyFlag::Pri => "PRI",
        KeyFlag::Uni => "UNI",
        KeyFlag::Mul => "MUL",
    };
    Row::from_pairs([
        ("Field", Some(c.name.clone())),
        ("Type", Some(c.data_type.clone())),
        ("Null", Some(if c.nullable { "YES" } else { "NO" }.to_string())),
        ("Key", Some(key.to_string())),
        ("Default", c.default_value.clone()),
        ("Extra", Some(c.extra.clone())),
    ])
}

fn constraint_row(c: &ConstraintDescriptor) -> Row {
    Row::from_pairs([
        ("CONSTRAINT_NAME", Some(c.name.clone())),
        ("TABLE_NAME", Some(c.table.clone())),
        ("COLUMN_NAME", Some(c.column.clone())),
        ("CONSTRAINT_TYPE", Some(c.constraint_type.to_string())),
        ("REFERENCED_TABLE_NAME", c.referenced_table.clone()),
        ("REFERENCED_COLUMN_NAME", c.referenced_column.clone()),
        ("UPDATE_RULE", c.on_update.clone()),
        ("DELETE_RULE", c.on_delete.clone()),
    ])
}

// ===== Fixtures =====

pub fn column(name: &str, data_type: &str, nullable: bool, key: KeyFlag) -> ColumnDescriptor {
    ColumnDescriptor {
        nullable,
        key,
        ..ColumnDescriptor::new(name, data_type)
    }
}

pub fn primary_key(table: &str, column: &str) -> ConstraintDescriptor {
    ConstraintDescriptor {
        name: "PRIMARY".into(),
        table: table.into(),
        column: column.into(),
        constraint_type: ConstraintType::PrimaryKey,
        referenced_table: None,
        referenced_column: None,
        on_update: None,
        on_delete: None,
    }
}

pub fn foreign_key(name: &str, table: &str, column: &str, referenced: &str) -> ConstraintDescriptor {
    ConstraintDescriptor {
        name: name.into(),
        table: table.into(),
        column: column.into(),
        constraint_type: ConstraintType::ForeignKey,
        referenced_table: Some(referenced.into()),
        referenced_column: Some("id".into()),
        on_update: Some("NO ACTION".into()),
        on_delete: Some("CASCADE".into()),
    }
}

pub fn orders_table() -> FakeTable {
    FakeTable {
        columns: vec![
            column("id", "int", false, KeyFlag::Pri),
            column("total", "decimal(10,2)", true, KeyFlag::None),
        ],
        create_statement: "CREATE TABLE `orders` (\n  `id` int NOT NULL,\n  `total` decimal(10,2) DEFAULT NULL,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB".into(),
        constraints: vec![primary_key("orders", "id")],
    }
}

pub fn order_items_table() -> FakeTable {
    FakeTable {
        columns: vec![
            column("id", "int", false, KeyFlag::Pri),
            column("order_id", "int", false, KeyFlag::Mul),
        ],
        create_statement: "CREATE TABLE `order_items` (\n  `id` int NOT NULL,\n  `order_id` int NOT NULL,\n  PRIMARY KEY (`id`),\n  KEY `fk_items_order` (`order_id`),\n  CONSTRAINT `fk_items_order` FOREIGN KEY (`order_id`) REFERENCES `orders` (`id`) ON DELETE CASCADE\n) ENGINE=InnoDB".into(),
        constraints: vec![
            primary_key("order_items", "id"),
            foreign_key("fk_items_order", "order_items", "order_id", "orders"),
        ],
    }
}

/// Source server with database `shop`. `order_items` is listed first so
/// dependency ordering has work to do.
pub fn shop_source() -> FakeServer {
    let mut server = FakeServer::default();
    server.databases.insert(
        "shop".into(),
        FakeDatabase {
            charset: Some("utf8mb4".into()),
            collation: Some("utf8mb4_0900_ai_ci".into()),
            tables: vec![
                ("order_items".into(), order_items_table()),
                ("orders".into(), orders_table()),
            ],
        },
    );
    server
}

/// Connection section for `host`.
pub fn connection_json(host: &str, extra: &str) -> String {
    format!(
        r#"{{"label": "{host}", "HOST": "{host}", "PORT": 3306, "USER": "repl", "PASSWORD": "pw", "DBMS": "mysql"{extra}}}"#
    )
}

/// Configuration replicating `source` onto `targets`.
pub fn config(source: &str, targets: &[&str]) -> Config {
    let targets: Vec<String> = targets.iter().map(|t| connection_json(t, "")).collect();
    Config::from_json(&format!(
        r#"{{"replicated_connection": {}, "other_connections": [{}], "settings": {{"retry_backoff_ms": 1}}}}"#,
        connection_json(source, ""),
        targets.join(", ")
    ))
    .unwrap()
}
