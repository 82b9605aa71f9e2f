//! Per-environment backend configuration, read from a YAML file.
//!
//! ```yaml
//! development:
//!   adapter: sqlite
//!   database: db/development.sqlite3
//! warehouse:
//!   adapter: postgres
//!   host: localhost
//!   database: warehouse
//!   user: etl
//! ```

use crate::db::{ConnectionParams, TRACKING_RELATION};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/database.yml";

/// Environment variable naming the environment to use.
pub const ENV_VAR: &str = "DATATASK_ENV";

pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Backend selected by an environment's `adapter` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    /// PostgreSQL tracked with rules only.
    Postgresql,
    /// PostgreSQL tracked with rules, a truncate trigger and a drop event trigger.
    Postgres,
    Greenplum,
    Filesystem,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::Postgresql => "postgresql",
            BackendKind::Postgres => "postgres",
            BackendKind::Greenplum => "greenplum",
            BackendKind::Filesystem => "filesystem",
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(BackendKind::Sqlite),
            "postgresql" => Ok(BackendKind::Postgresql),
            "postgres" => Ok(BackendKind::Postgres),
            "greenplum" => Ok(BackendKind::Greenplum),
            "filesystem" | "file" => Ok(BackendKind::Filesystem),
            other => Err(Error::Configuration(format!("unknown adapter `{other}`"))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_tracking_relation() -> String {
    TRACKING_RELATION.to_string()
}

/// One named environment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnvironmentConfig {
    /// Kept as written; an unknown value fails when the adapter is first built.
    pub adapter: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default, alias = "user")]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Root directory for the filesystem adapter.
    #[serde(default)]
    pub base_path: Option<PathBuf>,
    #[serde(default = "default_tracking_relation")]
    pub tracking_relation: String,
}

impl EnvironmentConfig {
    pub fn kind(&self) -> Result<BackendKind> {
        self.adapter.parse()
    }

    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// All environments from one configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Config {
    environments: BTreeMap<String, EnvironmentConfig>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn environment(&self, name: &str) -> Result<&EnvironmentConfig> {
        self.environments.get(name).ok_or_else(|| {
            Error::Configuration(format!("no environment `{name}` in configuration"))
        })
    }

    pub fn environment_names(&self) -> impl Iterator<Item = &str> {
        self.environments.keys().map(String::as_str)
    }
}

/// The environment to use: an explicit choice, else `DATATASK_ENV`, else
/// `development`.
pub fn selected_environment(explicit: Option<&str>) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| std::env::var(ENV_VAR).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
}
