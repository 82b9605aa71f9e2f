//! Database layer: backend clients, connection sharing and the tracking
//! relation's vocabulary.

pub mod connection;
pub mod names;
pub mod postgres;
pub mod sqlite;
pub mod tracking;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{ConnectionKey, ConnectionParams, ConnectionRegistry};
pub use names::parse_qualified_name;
pub use postgres::PgClient;
pub use sqlite::SqliteClient;
pub use tracking::{Operation, RelationKind, TrackedOperation, Vocabulary};

use crate::error::{Error, Result};
use crate::sql::ResultSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, warn};

/// Default name of the tracking relation.
pub const TRACKING_RELATION: &str = "last_operations";

/// A blocking connection to one backend.
pub trait Client: Send {
    /// Short backend name used in logs and errors.
    fn backend(&self) -> &'static str;

    /// Run one statement and return its rows. Statements without a result set
    /// return an empty `ResultSet`.
    fn execute(&mut self, sql: &str) -> Result<ResultSet>;

    /// Whether a transaction is currently open. Backends that cannot tell
    /// answer `true`, which makes closing statements always run.
    fn in_transaction(&mut self) -> Result<bool> {
        Ok(true)
    }
}

/// A client shared by every adapter pointed at the same target.
pub type SharedClient = Arc<Mutex<dyn Client>>;

/// Statement execution with logging, rollback on failure and the
/// tracking-relation diagnostic.
#[derive(Clone)]
pub struct Session {
    client: SharedClient,
    tracking_relation: String,
}

impl Session {
    pub fn new(client: SharedClient, tracking_relation: impl Into<String>) -> Self {
        Self {
            client,
            tracking_relation: tracking_relation.into(),
        }
    }

    pub fn tracking_relation(&self) -> &str {
        &self.tracking_relation
    }

    pub fn client(&self) -> &SharedClient {
        &self.client
    }

    pub fn execute(&self, sql: &str) -> Result<ResultSet> {
        let mut client = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(backend = client.backend(), sql = %compact(sql), "execute");

        match client.execute(sql) {
            Ok(rows) => Ok(rows),
            Err(Error::Backend(e)) => {
                if e.is_missing(&self.tracking_relation) {
                    error!(
                        "Tracking is not set up in this schema. Set up tracking in this schema first."
                    );
                } else {
                    warn!(backend = %e.backend, "{}", e.message.trim_end());
                }
                if client.in_transaction().unwrap_or(false) {
                    if let Err(rollback) = client.execute("rollback") {
                        warn!("rollback after failed statement also failed: {rollback}");
                    }
                }
                Err(Error::Backend(e))
            }
            Err(e) => Err(e),
        }
    }

    /// Run `body` inside a transaction that is committed or rolled back as
    /// requested, whether or not `body` fails. Nested use is not supported.
    pub fn with_transaction<T>(&self, commit: bool, body: impl FnOnce() -> Result<T>) -> Result<T> {
        self.execute("begin")?;
        let result = body();
        let close = if commit { "commit" } else { "rollback" };

        let still_open = {
            let mut client = self.client.lock().unwrap_or_else(PoisonError::into_inner);
            client.in_transaction()?
        };
        let closed = if still_open {
            self.execute(close).map(|_| ())
        } else {
            Ok(())
        };

        let value = result?;
        closed?;
        Ok(value)
    }
}

/// Collapse whitespace so generated SQL logs on one line.
fn compact(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
