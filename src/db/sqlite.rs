//! SQLite client.

use crate::db::Client;
use crate::error::{BackendError, BackendErrorKind, Error, Result};
use crate::sql::{ResultSet, Value};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A lazily opened SQLite connection.
pub struct SqliteClient {
    path: PathBuf,
    conn: Option<Connection>,
}

impl SqliteClient {
    /// Prepare a client for the database file at `path` (`:memory:` for a
    /// private in-memory database). Nothing is opened until first use.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            conn: None,
        }
    }

    pub fn open_in_memory() -> Self {
        Self::new(":memory:")
    }

    fn connection(&mut self) -> Result<&mut Connection> {
        if self.conn.is_none() {
            debug!(path = %self.path.display(), "opening sqlite database");
            let conn = if self.path.as_os_str() == ":memory:" {
                Connection::open_in_memory()?
            } else {
                Connection::open(&self.path)?
            };
            self.conn = Some(conn);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| Error::Unsupported("sqlite connection unavailable".into()))
    }
}

impl Client for SqliteClient {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn execute(&mut self, sql: &str) -> Result<ResultSet> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(sql).map_err(classify)?;
        let columns = stmt.column_count();

        let mut rows = stmt.query([]).map_err(classify)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(classify)? {
            let mut values = Vec::with_capacity(columns);
            for i in 0..columns {
                values.push(match row.get_ref(i).map_err(classify)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(n) => Value::Integer(n),
                    ValueRef::Real(r) => Value::Real(r),
                    ValueRef::Text(t) | ValueRef::Blob(t) => {
                        Value::Text(String::from_utf8_lossy(t).into_owned())
                    }
                });
            }
            out.push(values);
        }
        Ok(ResultSet::new(out))
    }

    fn in_transaction(&mut self) -> Result<bool> {
        Ok(self.conn.as_ref().is_some_and(|c| !c.is_autocommit()))
    }
}

fn classify(err: rusqlite::Error) -> Error {
    let message = err.to_string();
    let kind = if message.contains("no such table") || message.contains("no such view") {
        BackendErrorKind::UndefinedRelation
    } else {
        BackendErrorKind::Other
    };
    Error::Backend(BackendError::new("sqlite", kind, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_returns_typed_values() {
        let mut client = SqliteClient::open_in_memory();
        client.execute("create table t (a integer, b text, c real)").unwrap();
        client
            .execute("insert into t values (1, 'x', 1.5), (null, 'y', 2.0)")
            .unwrap();

        let r = client.execute("select a, b, c from t order by b").unwrap();
        assert_eq!(
            r.rows(),
            &[
                vec![Value::Integer(1), Value::from("x"), Value::Real(1.5)],
                vec![Value::Null, Value::from("y"), Value::Real(2.0)],
            ]
        );
    }

    #[test]
    fn test_ddl_returns_empty_result() {
        let mut client = SqliteClient::open_in_memory();
        assert!(client.execute("create table t (a text)").unwrap().is_empty());
    }

    #[test]
    fn test_missing_table_is_classified() {
        let mut client = SqliteClient::open_in_memory();
        match client.execute("select * from last_operations") {
            Err(Error::Backend(e)) => {
                assert_eq!(e.kind, BackendErrorKind::UndefinedRelation);
                assert!(e.is_missing("last_operations"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_in_transaction() {
        let mut client = SqliteClient::open_in_memory();
        assert!(!client.in_transaction().unwrap());
        client.execute("begin").unwrap();
        assert!(client.in_transaction().unwrap());
        client.execute("rollback").unwrap();
        assert!(!client.in_transaction().unwrap());
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.db");
        let mut client = SqliteClient::new(&path);
        client.execute("create table t (a text)").unwrap();
        assert!(path.exists());
    }
}
