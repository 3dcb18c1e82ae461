//! Configuration type definitions.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::core::traits::Endpoint;
use crate::drivers::Dbms;
use crate::error::Result;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The source of truth whose schema is replicated.
    pub replicated_connection: ConnectionConfig,

    /// Targets that receive the schema.
    pub other_connections: Vec<ConnectionConfig>,

    /// Execution behavior.
    #[serde(default)]
    pub settings: ReplicationSettings,
}

/// One endpoint, in the upper-case key layout of the connections file.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Optional name used in logs and reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Database host.
    #[serde(rename = "HOST")]
    pub host: String,

    /// Database port (default: 3306). Accepts a number or a numeric string.
    #[serde(
        rename = "PORT",
        default = "default_mysql_port",
        deserialize_with = "port_from_number_or_string"
    )]
    pub port: u16,

    /// Username.
    #[serde(rename = "USER")]
    pub user: String,

    /// Password.
    #[serde(rename = "PASSWORD", default)]
    pub password: String,

    /// Database allowlist. Empty selects every non-system database.
    #[serde(rename = "DATABASE", default, deserialize_with = "null_as_empty")]
    pub databases: Vec<String>,

    /// Table allowlist. Empty selects every table.
    #[serde(rename = "TABLE", default, deserialize_with = "null_as_empty")]
    pub tables: Vec<String>,

    /// Engine name, matched case-insensitively (e.g. "mysql", "MariaDB").
    #[serde(rename = "DBMS")]
    pub dbms: String,
}

impl ConnectionConfig {
    /// Parsed engine kind.
    pub fn dbms(&self) -> Result<Dbms> {
        self.dbms.parse()
    }

    /// Network coordinates for a port factory.
    pub fn endpoint(&self) -> Result<Endpoint> {
        Ok(Endpoint {
            dbms: self.dbms()?,
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
        })
    }

    /// Configured label, or `user@host:port`.
    pub fn display_label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("{}@{}:{}", self.user, self.host, self.port))
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("label", &self.label)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("databases", &self.databases)
            .field("tables", &self.tables)
            .field("dbms", &self.dbms)
            .finish()
    }
}

/// Execution behavior shared by every connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSettings {
    /// Per-statement timeout in seconds (default: 30).
    #[serde(default = "default_statement_timeout_secs")]
    pub statement_timeout_secs: u64,

    /// Retries for read statements on transient transport failures (default: 2).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff between retries in milliseconds, multiplied by the attempt (default: 500).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Process targets concurrently, one task per target (default: true).
    #[serde(default = "default_true")]
    pub parallel_targets: bool,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            statement_timeout_secs: default_statement_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            parallel_targets: true,
        }
    }
}

impl ReplicationSettings {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u64),
    Text(String),
}

fn port_from_number_or_string<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let raw = match PortValue::deserialize(deserializer)? {
        PortValue::Number(n) => n,
        PortValue::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| D::Error::custom(format!("invalid PORT '{}'", s)))?,
    };
    u16::try_from(raw).map_err(|_| D::Error::custom(format!("PORT {} out of range", raw)))
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

// Default value functions for serde
fn default_mysql_port() -> u16 {
    Dbms::Mysql.default_port()
}

fn default_statement_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}
