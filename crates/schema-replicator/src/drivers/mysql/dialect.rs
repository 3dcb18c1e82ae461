//! MySQL/MariaDB catalog dialect (Strategy pattern).
//!
//! Provides the catalog statements, identifier quoting and row parsing used
//! by the connection descriptor.

use crate::core::schema::{ColumnDescriptor, ConstraintDescriptor, ConstraintType, KeyFlag};
use crate::core::traits::Dialect;
use crate::core::value::Row;
use crate::error::TransportError;

/// ER_BAD_DB_ERROR
const ER_BAD_DB_ERROR: u16 = 1049;
/// ER_NO_SUCH_TABLE
const ER_NO_SUCH_TABLE: u16 = 1146;

const SYSTEM_DATABASES: &[&str] = &["information_schema", "mysql", "performance_schema", "sys"];

// CAST to CHAR to handle collation differences where information_schema
// may return VARBINARY instead of VARCHAR
const COLUMN_CONSTRAINTS_QUERY: &str = r#"
    SELECT
        CAST(kcu.CONSTRAINT_NAME AS CHAR(255)) AS CONSTRAINT_NAME,
        CAST(kcu.TABLE_NAME AS CHAR(255)) AS TABLE_NAME,
        CAST(kcu.COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
        CAST(tc.CONSTRAINT_TYPE AS CHAR(64)) AS CONSTRAINT_TYPE,
        CAST(kcu.REFERENCED_TABLE_NAME AS CHAR(255)) AS REFERENCED_TABLE_NAME,
        CAST(kcu.REFERENCED_COLUMN_NAME AS CHAR(255)) AS REFERENCED_COLUMN_NAME,
        CAST(rc.UPDATE_RULE AS CHAR(64)) AS UPDATE_RULE,
        CAST(rc.DELETE_RULE AS CHAR(64)) AS DELETE_RULE
    FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE owner
    JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
        ON kcu.TABLE_SCHEMA = owner.TABLE_SCHEMA
        AND kcu.TABLE_NAME = owner.TABLE_NAME
        AND kcu.CONSTRAINT_NAME = owner.CONSTRAINT_NAME
    JOIN INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
        ON tc.TABLE_SCHEMA = kcu.TABLE_SCHEMA
        AND tc.TABLE_NAME = kcu.TABLE_NAME
        AND tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
    LEFT JOIN INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc
        ON rc.CONSTRAINT_SCHEMA = kcu.CONSTRAINT_SCHEMA
        AND rc.TABLE_NAME = kcu.TABLE_NAME
        AND rc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
    WHERE owner.TABLE_SCHEMA = ? AND owner.TABLE_NAME = ? AND owner.COLUMN_NAME = ?
    ORDER BY kcu.CONSTRAINT_NAME, kcu.ORDINAL_POSITION
"#;

const FOREIGN_KEY_REFERENCES_QUERY: &str = r#"
    SELECT DISTINCT
        CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME,
        CAST(REFERENCED_TABLE_NAME AS CHAR(255)) AS REFERENCED_TABLE_NAME
    FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
    WHERE TABLE_SCHEMA = ?
      AND REFERENCED_TABLE_SCHEMA = TABLE_SCHEMA
      AND REFERENCED_TABLE_NAME IS NOT NULL
    ORDER BY TABLE_NAME
"#;

const DATABASE_DEFAULTS_QUERY: &str = r#"
    SELECT
        CAST(DEFAULT_CHARACTER_SET_NAME AS CHAR(64)) AS CHARSET_NAME,
        CAST(DEFAULT_COLLATION_NAME AS CHAR(64)) AS COLLATION_NAME
    FROM INFORMATION_SCHEMA.SCHEMATA
    WHERE SCHEMA_NAME = ?
"#;

/// MySQL/MariaDB dialect implementation.
///
/// Compatible with MySQL 5.7+, 8.0+, and MariaDB 10.2+.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    /// Create a new MySQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MysqlDialect {
    fn name(&self) -> &str {
        "mysql"
    }

    fn quote_ident(&self, name: &str) -> String {
        // MySQL uses backticks for identifier quoting
        // Handle names that contain backticks by doubling them
        format!("`{}`", name.replace('`', "``"))
    }

    fn system_databases(&self) -> &'static [&'static str] {
        SYSTEM_DATABASES
    }

    fn list_databases(&self) -> String {
        "SHOW DATABASES".to_string()
    }

    fn list_tables(&self) -> String {
        "SHOW FULL TABLES".to_string()
    }

    fn parse_table_row(&self, row: &Row) -> Option<String> {
        let name = row.get(0)?;
        match row.get_by_name("Table_type").or_else(|| row.get(1)) {
            Some(kind) if !kind.eq_ignore_ascii_case("BASE TABLE") => None,
            _ => Some(name.to_string()),
        }
    }

    fn describe_table(&self, table: &str) -> String {
        format!("SHOW COLUMNS FROM {}", self.quote_ident(table))
    }

    fn parse_column_row(&self, row: &Row) -> Option<ColumnDescriptor> {
        let field = |name: &str, idx: usize| row.get_by_name(name).or_else(|| row.get(idx));

        let name = field("Field", 0)?.to_string();
        let data_type = field("Type", 1)?.to_string();
        let nullable = field("Null", 2)
            .map(|v| v.eq_ignore_ascii_case("YES"))
            .unwrap_or(true);
        let key = field("Key", 3).map(KeyFlag::parse).unwrap_or_default();
        // A NULL default is reported as SQL NULL, not the string "NULL"
        let default_value = field("Default", 4).map(str::to_string);
        let extra = field("Extra", 5).unwrap_or_default().to_string();

        Some(ColumnDescriptor {
            name,
            data_type,
            nullable,
            key,
            default_value,
            extra,
        })
    }

    fn show_create_table(&self, table: &str) -> String {
        format!("SHOW CREATE TABLE {}", self.quote_ident(table))
    }

    fn parse_create_row(&self, row: &Row) -> Option<String> {
        row.get_by_name("Create Table")
            .or_else(|| row.get(1))
            .map(str::to_string)
    }

    fn column_constraints_query(&self) -> &'static str {
        COLUMN_CONSTRAINTS_QUERY
    }

    fn parse_constraint_row(&self, row: &Row) -> Option<ConstraintDescriptor> {
        let owned = |name: &str| row.get_by_name(name).map(str::to_string);

        Some(ConstraintDescriptor {
            name: owned("CONSTRAINT_NAME")?,
            table: owned("TABLE_NAME")?,
            column: owned("COLUMN_NAME")?,
            constraint_type: ConstraintType::parse(row.get_by_name("CONSTRAINT_TYPE")?),
            referenced_table: owned("REFERENCED_TABLE_NAME"),
            referenced_column: owned("REFERENCED_COLUMN_NAME"),
            on_update: owned("UPDATE_RULE"),
            on_delete: owned("DELETE_RULE"),
        })
    }

    fn foreign_key_references_query(&self) -> &'static str {
        FOREIGN_KEY_REFERENCES_QUERY
    }

    fn references_from_create_statement(&self, create_statement: &str) -> Vec<String> {
        let mut refs: Vec<String> = Vec::new();
        for line in create_statement.lines() {
            let Some(pos) = line.find("REFERENCES") else {
                continue;
            };
            if let Some(table) = parse_qualified_name(&line[pos + "REFERENCES".len()..]) {
                if !refs.contains(&table) {
                    refs.push(table);
                }
            }
        }
        refs
    }

    fn database_defaults_query(&self) -> &'static str {
        DATABASE_DEFAULTS_QUERY
    }

    fn create_database(
        &self,
        name: &str,
        charset: Option<&str>,
        collation: Option<&str>,
    ) -> String {
        let mut sql = format!("CREATE DATABASE IF NOT EXISTS {}", self.quote_ident(name));
        if let Some(charset) = charset {
            sql.push_str(&format!(" CHARACTER SET {}", charset));
        }
        if let Some(collation) = collation {
            sql.push_str(&format!(" COLLATE {}", collation));
        }
        sql
    }

    fn alter_table(&self, table: &str, clause: &str) -> String {
        format!("ALTER TABLE {} {}", self.quote_ident(table), clause)
    }

    fn is_not_found(&self, err: &TransportError) -> bool {
        matches!(err.server_code(), Some(ER_BAD_DB_ERROR | ER_NO_SUCH_TABLE))
    }
}

/// Parse `` `db`.`table` `` / `` `table` `` / `table` at the start of `input`.
///
/// Returns `table` for an unqualified name and `db.table` for a qualified one.
fn parse_qualified_name(input: &str) -> Option<String> {
    let mut rest = input.trim_start();
    let mut parts = Vec::new();

    loop {
        let (ident, remaining) = parse_ident(rest)?;
        parts.push(ident);
        rest = remaining;
        match rest.strip_prefix('.') {
            Some(after_dot) => rest = after_dot,
            None => break,
        }
    }

    Some(parts.join("."))
}

fn parse_ident(input: &str) -> Option<(String, &str)> {
    if let Some(quoted) = input.strip_prefix('`') {
        let mut ident = String::new();
        let mut chars = quoted.char_indices().peekable();
        while let Some((idx, c)) = chars.next() {
            if c == '`' {
                if matches!(chars.peek(), Some((_, '`'))) {
                    ident.push('`');
                    chars.next();
                } else {
                    return Some((ident, &quoted[idx + 1..]));
                }
            } else {
                ident.push(c);
            }
        }
        None
    } else {
        let end = input
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
            .unwrap_or(input.len());
        if end == 0 {
            None
        } else {
            Some((input[..end].to_string(), &input[end..]))
        }
    }
}
