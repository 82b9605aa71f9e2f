//! Connection parameters and the registry that shares one connection per target.

use crate::db::postgres::PgClient;
use crate::db::sqlite::SqliteClient;
use crate::db::SharedClient;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Parameters needed to reach a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConnectionParams {
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost")
    }

    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }

    /// The database name, which every relational backend requires.
    pub fn require_database(&self) -> Result<&str> {
        self.database
            .as_deref()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| Error::Configuration("missing required parameter `database`".into()))
    }
}

/// Identity of a connection: two adapters with equal keys share a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub backend: &'static str,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
}

/// Process-wide owner of live connections, keyed by `ConnectionKey`.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionKey, SharedClient>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the connection registered under `key`, creating it with
    /// `connect` on first use.
    pub fn get_or_connect(
        &self,
        key: ConnectionKey,
        connect: impl FnOnce() -> Result<SharedClient>,
    ) -> Result<SharedClient> {
        let mut connections = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = connections.get(&key) {
            debug!(?key, "reusing connection");
            return Ok(Arc::clone(existing));
        }

        let client = connect()?;
        connections.insert(key, Arc::clone(&client));
        Ok(client)
    }

    pub fn sqlite(&self, params: &ConnectionParams) -> Result<SharedClient> {
        let database = params.require_database()?.to_string();
        let key = ConnectionKey {
            backend: "sqlite",
            host: String::new(),
            port: 0,
            database: database.clone(),
            username: String::new(),
        };
        self.get_or_connect(key, || {
            let client: SharedClient = Arc::new(Mutex::new(SqliteClient::new(database)));
            Ok(client)
        })
    }

    pub fn postgres(&self, params: &ConnectionParams) -> Result<SharedClient> {
        let key = ConnectionKey {
            backend: "postgres",
            host: params.host().to_string(),
            port: params.port_or(5432),
            database: params.require_database()?.to_string(),
            username: params.username.clone().unwrap_or_default(),
        };
        self.get_or_connect(key, || {
            let client: SharedClient = Arc::new(Mutex::new(PgClient::new(params.clone())?));
            Ok(client)
        })
    }

    pub fn len(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
