//! MySQL/MariaDB database driver.
//!
//! This module provides MySQL-specific implementations for:
//! - [`MysqlDialect`]: catalog statement text and row parsing
//! - [`MysqlPortFactory`]: opens `mysql_async` connections as metadata ports
//!
//! # Supported Versions
//!
//! - MySQL 5.7+, 8.0+
//! - MariaDB 10.2+

mod dialect;
mod port;

pub use dialect::MysqlDialect;
pub use port::{MysqlPort, MysqlPortFactory};
