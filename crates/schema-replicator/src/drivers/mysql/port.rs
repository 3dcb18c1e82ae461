//! MySQL/MariaDB metadata port.
//!
//! Each port owns exactly one `mysql_async` connection. Parameterless
//! statements go over the text protocol (SHOW statements are not preparable);
//! parameterized ones are prepared and bound positionally.

use std::sync::Arc;

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Value};
use tracing::{debug, info};

use crate::core::traits::{Endpoint, MetadataPort, PortFactory};
use crate::core::value::Row;
use crate::error::TransportError;

/// Opens [`MysqlPort`]s.
#[derive(Debug, Clone, Default)]
pub struct MysqlPortFactory;

impl MysqlPortFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PortFactory for MysqlPortFactory {
    async fn open(
        &self,
        endpoint: &Endpoint,
        database: Option<&str>,
    ) -> Result<Box<dyn MetadataPort>, TransportError> {
        let opts: Opts = OptsBuilder::default()
            .ip_or_hostname(&endpoint.host)
            .tcp_port(endpoint.port)
            .user(Some(&endpoint.user))
            .pass(Some(&endpoint.password))
            .db_name(database)
            // Use utf8mb4 for full Unicode support
            .init(vec!["SET NAMES utf8mb4"])
            .into();

        let conn = Conn::new(opts).await.map_err(classify)?;

        info!(
            "Connected to {}: {}/{}",
            endpoint.dbms,
            endpoint.display_name(),
            database.unwrap_or("")
        );

        Ok(Box::new(MysqlPort {
            conn: Some(conn),
            label: format!("{}/{}", endpoint.display_name(), database.unwrap_or("")),
        }))
    }
}

/// One exclusively owned MySQL connection.
pub struct MysqlPort {
    conn: Option<Conn>,
    label: String,
}

#[async_trait]
impl MetadataPort for MysqlPort {
    async fn execute(
        &mut self,
        statement: &str,
        params: &[&str],
    ) -> Result<Vec<Row>, TransportError> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| TransportError::Connection(format!("{} is closed", self.label)))?;

        let rows: Vec<mysql_async::Row> = if params.is_empty() {
            conn.query(statement).await.map_err(classify)?
        } else {
            let values: Vec<Value> = params
                .iter()
                .map(|p| Value::Bytes(p.as_bytes().to_vec()))
                .collect();
            conn.exec(statement, Params::Positional(values))
                .await
                .map_err(classify)?
        };

        Ok(rows.into_iter().map(convert_row).collect())
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.disconnect().await {
                debug!("Error while disconnecting {}: {}", self.label, e);
            } else {
                debug!("Disconnected {}", self.label);
            }
        }
    }
}

/// Split driver failures into server rejections and everything else.
fn classify(err: mysql_async::Error) -> TransportError {
    match err {
        mysql_async::Error::Server(e) => TransportError::Server {
            code: e.code,
            message: e.message,
        },
        other => TransportError::Connection(other.to_string()),
    }
}

fn convert_row(mut row: mysql_async::Row) -> Row {
    let columns: Arc<[String]> = row
        .columns_ref()
        .iter()
        .map(|c| c.name_str().into_owned())
        .collect::<Vec<_>>()
        .into();

    let values = (0..row.len())
        .map(|idx| row.take::<Value, _>(idx).and_then(value_to_text))
        .collect();

    Row::new(columns, values)
}

fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Value::Int(v) => Some(v.to_string()),
        Value::UInt(v) => Some(v.to_string()),
        Value::Float(v) => Some(v.to_string()),
        Value::Double(v) => Some(v.to_string()),
        Value::Date(year, month, day, hour, minute, second, micros) => Some(format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
            year, month, day, hour, minute, second, micros
        )),
        Value::Time(negative, days, hours, minutes, seconds, micros) => Some(format!(
            "{}{:02}:{:02}:{:02}.{:06}",
            if negative { "-" } else { "" },
            days * 24 + u32::from(hours),
            minutes,
            seconds,
            micros
        )),
    }
}
