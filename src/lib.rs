//! # datatask - change tracking for database-backed tasks
//!
//! Records the latest operation on every monitored relation in a tracking
//! relation kept current by the backend itself (triggers, rules or a
//! system-catalog view), so a build tool can decide whether a relation is
//! older than its prerequisites, the way it would compare file times.
//!
//! Backends: SQLite, PostgreSQL (rule-based or trigger-based), Greenplum and
//! the local filesystem.

pub mod adapter;
pub mod cli;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod sql;
pub mod task;

// Re-export commonly used types
pub use adapter::{Adapter, Data};
pub use config::{BackendKind, Config};
pub use context::Context;
pub use error::{Error, Result};
pub use task::{Application, DataTask, Timestamp};
