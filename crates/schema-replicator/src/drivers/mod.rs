//! Database driver implementations.
//!
//! - [`mysql`]: MySQL/MariaDB dialect and `mysql_async`-backed metadata port
//!
//! # Adding New Databases
//!
//! 1. Create a module under `drivers/` implementing [`Dialect`] and a
//!    [`PortFactory`](crate::core::PortFactory)
//! 2. Add a variant to [`Dbms`] and map it in [`Dbms::dialect`]
//!
//! Source and target must share a dialect family; DDL text is replayed as-is.

pub mod mysql;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use mysql::{MysqlDialect, MysqlPortFactory};

use crate::core::traits::Dialect;
use crate::error::ReplicateError;

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dbms {
    Mysql,
    Mariadb,
}

impl Dbms {
    /// Statement strategy for this engine.
    pub fn dialect(&self) -> Arc<dyn Dialect> {
        match self {
            Dbms::Mysql | Dbms::Mariadb => Arc::new(MysqlDialect::new()),
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Dbms::Mysql | Dbms::Mariadb => 3306,
        }
    }
}

impl FromStr for Dbms {
    type Err = ReplicateError;

    /// Parse a configured DBMS name, case-insensitively.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "mysql" => Ok(Dbms::Mysql),
            "mariadb" => Ok(Dbms::Mariadb),
            other => Err(ReplicateError::Config(format!(
                "Unknown DBMS: '{}'. Supported: mysql, mariadb",
                other
            ))),
        }
    }
}

impl fmt::Display for Dbms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dbms::Mysql => write!(f, "mysql"),
            Dbms::Mariadb => write!(f, "mariadb"),
        }
    }
}
