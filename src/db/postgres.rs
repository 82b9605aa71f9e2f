//! PostgreSQL client.
//!
//! sqlx is asynchronous; this client owns a small tokio runtime and blocks on
//! every call so the rest of the crate stays synchronous.

use crate::db::connection::ConnectionParams;
use crate::db::Client;
use crate::error::{BackendError, BackendErrorKind, Error, Result};
use crate::sql::{ResultSet, Value};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Column, Connection, Row, TypeInfo, ValueRef};
use tokio::runtime::Runtime;
use tracing::{debug, info};

/// SQLSTATE for `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";

/// A lazily connected PostgreSQL (or Greenplum) connection.
pub struct PgClient {
    options: PgConnectOptions,
    runtime: Runtime,
    conn: Option<PgConnection>,
    /// Set by a successful `begin`, cleared by `commit` or `rollback`.
    in_transaction: bool,
}

impl PgClient {
    pub fn new(params: ConnectionParams) -> Result<Self> {
        let mut options = PgConnectOptions::new()
            .host(params.host())
            .port(params.port_or(5432))
            .database(params.require_database()?);
        if let Some(user) = params.username.as_deref() {
            options = options.username(user);
        }
        if let Some(password) = params.password.as_deref() {
            options = options.password(password);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            options,
            runtime,
            conn: None,
            in_transaction: false,
        })
    }

    fn connection(&mut self) -> Result<&mut PgConnection> {
        if self.conn.is_none() {
            info!(
                host = self.options.get_host(),
                port = self.options.get_port(),
                "connecting to postgres"
            );
            let conn = self
                .runtime
                .block_on(PgConnection::connect_with(&self.options))?;
            self.conn = Some(conn);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| Error::Unsupported("postgres connection unavailable".into()))
    }
}

impl Client for PgClient {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    fn execute(&mut self, sql: &str) -> Result<ResultSet> {
        self.connection()?;
        let Self { runtime, conn, .. } = self;
        let Some(conn) = conn.as_mut() else {
            return Err(Error::Unsupported("postgres connection unavailable".into()));
        };

        let rows: Vec<PgRow> = runtime
            .block_on(sqlx::query(sql).persistent(false).fetch_all(conn))
            .map_err(classify)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(row.len());
            for i in 0..row.len() {
                values.push(decode(row, i)?);
            }
            out.push(values);
        }
        if let Some(open) = transaction_effect(sql) {
            self.in_transaction = open;
        }
        Ok(ResultSet::new(out))
    }

    fn in_transaction(&mut self) -> Result<bool> {
        Ok(self.conn.is_some() && self.in_transaction)
    }
}

/// How a statement changes the transaction state: `Some(true)` opens one,
/// `Some(false)` ends it, `None` leaves it alone.
fn transaction_effect(sql: &str) -> Option<bool> {
    let mut words = sql
        .split_whitespace()
        .map(|w| w.trim_end_matches(';').to_ascii_lowercase());
    match (words.next()?.as_str(), words.next().as_deref()) {
        ("rollback", Some("to")) => None,
        ("begin", _) | ("start", Some("transaction")) => Some(true),
        ("commit" | "rollback" | "end" | "abort", _) => Some(false),
        _ => None,
    }
}

/// Decode one column into the text conventions of `psql`: booleans as
/// `t`/`f`, timestamps as `YYYY-MM-DD HH:MM:SS.ffffff+00`.
fn decode(row: &PgRow, i: usize) -> Result<Value> {
    if row.try_get_raw(i)?.is_null() {
        return Ok(Value::Null);
    }

    let type_name = row.column(i).type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOL" => Value::from(if row.try_get::<bool, _>(i)? { "t" } else { "f" }),
        "INT2" => Value::Integer(row.try_get::<i16, _>(i)?.into()),
        "INT4" => Value::Integer(row.try_get::<i32, _>(i)?.into()),
        "INT8" => Value::Integer(row.try_get::<i64, _>(i)?),
        "FLOAT4" => Value::Real(row.try_get::<f32, _>(i)?.into()),
        "FLOAT8" => Value::Real(row.try_get::<f64, _>(i)?),
        "TIMESTAMPTZ" => Value::Text(
            row.try_get::<DateTime<Utc>, _>(i)?
                .format("%Y-%m-%d %H:%M:%S%.6f+00")
                .to_string(),
        ),
        "TIMESTAMP" => Value::Text(
            row.try_get::<NaiveDateTime, _>(i)?
                .format("%Y-%m-%d %H:%M:%S%.6f")
                .to_string(),
        ),
        _ => match row.try_get::<String, _>(i) {
            Ok(s) => Value::Text(s),
            Err(e) => {
                debug!(column = i, %type_name, "undecodable column: {e}");
                return Err(Error::conversion(type_name, "text"));
            }
        },
    };
    Ok(value)
}

fn classify(err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::Database(db) => {
            let kind = if db.code().as_deref() == Some(UNDEFINED_TABLE) {
                BackendErrorKind::UndefinedRelation
            } else {
                BackendErrorKind::Other
            };
            Error::Backend(BackendError::new("postgres", kind, db.message()))
        }
        _ => Error::Postgres(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_database() {
        let err = PgClient::new(ConnectionParams::default()).err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_new_does_not_connect() {
        let client = PgClient::new(ConnectionParams {
            host: Some("db.invalid".into()),
            database: Some("warehouse".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(client.conn.is_none());
        assert_eq!(client.backend(), "postgres");
    }

    #[test]
    fn test_not_in_transaction_before_begin() {
        let mut client = PgClient::new(ConnectionParams {
            database: Some("warehouse".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(!client.in_transaction().unwrap());
    }

    #[test]
    fn test_transaction_effect() {
        assert_eq!(transaction_effect("begin"), Some(true));
        assert_eq!(transaction_effect("BEGIN;"), Some(true));
        assert_eq!(transaction_effect("start transaction isolation level serializable"), Some(true));
        assert_eq!(transaction_effect("commit"), Some(false));
        assert_eq!(transaction_effect("  rollback;"), Some(false));
        assert_eq!(transaction_effect("end"), Some(false));
        assert_eq!(transaction_effect("insert into t1 values (1)"), None);
        assert_eq!(transaction_effect("rollback to savepoint s1"), None);
        assert_eq!(transaction_effect(""), None);
    }
}
