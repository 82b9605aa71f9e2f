//! Adapters: one facade per backend for relation lifecycle and change tracking.

pub mod filesystem;
pub mod postgres;
pub mod sqlite;

pub use filesystem::{FileStore, FilesystemAdapter, LocalFileStore};
pub use postgres::{CatalogRecorder, PostgresAdapter, Recorder, RuleRecorder, TriggerRecorder};
pub use sqlite::SqliteAdapter;

use crate::config::BackendKind;
use crate::db::TrackedOperation;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// What the freshness logic and the CLI need from a backend.
///
/// Names may be schema-qualified (`schema.name`); unqualified names resolve
/// through the backend's search order.
pub trait Adapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether every tracking artifact is present in `scope` (or, with no
    /// scope, in the first schema holding a tracking relation).
    fn is_tracking(&self, scope: Option<&str>) -> Result<bool>;

    /// Install tracking in `scope`, or the first schema of the search order.
    /// A no-op when already tracking unless `force` is set.
    fn set_up_tracking(&self, scope: Option<&str>, force: bool) -> Result<()>;

    /// Remove the tracking relation and per-scope recorder artifacts.
    /// Database-wide artifacts survive; see `tear_down_global_tracking`.
    fn tear_down_tracking(&self, scope: Option<&str>) -> Result<()>;

    /// Remove recorder artifacts shared by every scope.
    fn tear_down_global_tracking(&self) -> Result<()> {
        Ok(())
    }

    /// Delete every tracked row, keeping the mechanism.
    fn reset_tracking(&self, scope: Option<&str>) -> Result<()>;

    /// Existence check, limited to `schemas` when given.
    fn data_exists(&self, name: &str, schemas: Option<&[String]>) -> Result<bool>;

    /// Time of the latest recorded operation, `None` when the relation does not exist.
    fn data_mtime(&self, name: &str) -> Result<Option<DateTime<Utc>>>;

    /// Replace `name` with a new relation built from `column_spec` and, when
    /// given, `create ... as <definition>`.
    fn create_data(
        &self,
        name: &str,
        definition: Option<&str>,
        column_spec: &str,
        track: bool,
    ) -> Result<()>;

    fn drop_data(&self, name: &str) -> Result<()>;

    fn truncate_data(&self, name: &str) -> Result<()>;

    /// Tracked rows for `name`, oldest first.
    fn tracked_operations(&self, name: &str) -> Result<Vec<TrackedOperation>>;

    /// Run `body` between a transaction start and a commit (or rollback).
    /// The closing statement runs even when `body` fails.
    fn transaction(&self, commit: bool, body: &mut dyn FnMut() -> Result<()>) -> Result<()>;

    fn create_view(&self, name: &str, _definition: &str) -> Result<()> {
        Err(self.unsupported("views", name))
    }

    fn drop_view(&self, name: &str) -> Result<()> {
        Err(self.unsupported("views", name))
    }

    fn view_exists(&self, name: &str) -> Result<bool> {
        Err(self.unsupported("views", name))
    }

    #[doc(hidden)]
    fn unsupported(&self, what: &str, name: &str) -> Error {
        Error::Unsupported(format!("{what} on {} ({name})", self.kind()))
    }
}

/// Run `body` in a transaction on `adapter`, returning its value.
pub fn with_transaction<A, T>(
    adapter: &A,
    commit: bool,
    body: impl FnOnce() -> Result<T>,
) -> Result<T>
where
    A: Adapter + ?Sized,
{
    let mut body = Some(body);
    let mut out = None;
    adapter.transaction(commit, &mut || {
        if let Some(f) = body.take() {
            out = Some(f()?);
        }
        Ok(())
    })?;
    out.ok_or_else(|| Error::Unsupported("transaction body did not run".into()))
}

/// A named data collection reachable through an adapter, roughly what a file
/// path is to the filesystem. Holds no state besides its identity.
#[derive(Clone)]
pub struct Data {
    name: String,
    adapter: Arc<dyn Adapter>,
}

impl Data {
    pub fn new(name: impl Into<String>, adapter: Arc<dyn Adapter>) -> Self {
        Self {
            name: name.into(),
            adapter,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub fn exists(&self) -> Result<bool> {
        self.adapter.data_exists(&self.name, None)
    }

    pub fn mtime(&self) -> Result<Option<DateTime<Utc>>> {
        self.adapter.data_mtime(&self.name)
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Data")
            .field("name", &self.name)
            .field("adapter", &self.adapter.kind())
            .finish()
    }
}
