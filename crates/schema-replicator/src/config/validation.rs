//! Configuration validation.

use super::{Config, ConnectionConfig};
use crate::error::{ReplicateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_connection(&config.replicated_connection, "replicated_connection")?;

    if config.other_connections.is_empty() {
        return Err(ReplicateError::Config(
            "other_connections must list at least one target".into(),
        ));
    }

    let source = &config.replicated_connection;
    for (idx, target) in config.other_connections.iter().enumerate() {
        let section = format!("other_connections[{}]", idx);
        validate_connection(target, &section)?;

        // Database names are replicated verbatim, so the source endpoint
        // would be its own target
        if target.host.eq_ignore_ascii_case(&source.host) && target.port == source.port {
            return Err(ReplicateError::Config(format!(
                "{} points at the source endpoint {}:{}",
                section, target.host, target.port
            )));
        }
    }

    if config.settings.statement_timeout_secs == 0 {
        return Err(ReplicateError::Config(
            "settings.statement_timeout_secs must be at least 1".into(),
        ));
    }

    Ok(())
}

fn validate_connection(conn: &ConnectionConfig, section: &str) -> Result<()> {
    if conn.host.trim().is_empty() {
        return Err(ReplicateError::Config(format!("{}.HOST is required", section)));
    }
    if conn.user.trim().is_empty() {
        return Err(ReplicateError::Config(format!("{}.USER is required", section)));
    }
    if conn.port == 0 {
        return Err(ReplicateError::Config(format!(
            "{}.PORT must be non-zero",
            section
        )));
    }
    conn.dbms().map_err(|e| match e {
        ReplicateError::Config(msg) => ReplicateError::Config(format!("{}.DBMS: {}", section, msg)),
        other => other,
    })?;
    if conn.databases.iter().any(|d| d.trim().is_empty()) {
        return Err(ReplicateError::Config(format!(
            "{}.DATABASE contains an empty name",
            section
        )));
    }
    if conn.tables.iter().any(|t| t.trim().is_empty()) {
        return Err(ReplicateError::Config(format!(
            "{}.TABLE contains an empty name",
            section
        )));
    }
    Ok(())
}
