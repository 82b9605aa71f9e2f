//! Process-wide context: the loaded configuration and the live connections.

use crate::adapter::{Adapter, FilesystemAdapter, PostgresAdapter, SqliteAdapter};
use crate::config::{BackendKind, Config};
use crate::db::ConnectionRegistry;
use crate::error::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Builds adapters from configuration, sharing connections between adapters
/// aimed at the same target.
pub struct Context {
    config: Config,
    registry: ConnectionRegistry,
}

impl Context {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: ConnectionRegistry::new(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Config::load(path)?))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// The adapter for environment `name`. Connecting is deferred to the
    /// first statement.
    pub fn adapter(&self, name: &str) -> Result<Arc<dyn Adapter>> {
        let env = self.config.environment(name)?;
        let kind = env.kind()?;
        debug!(environment = name, %kind, "building adapter");

        let adapter: Arc<dyn Adapter> = match kind {
            BackendKind::Sqlite => {
                let client = self.registry.sqlite(&env.connection_params())?;
                Arc::new(SqliteAdapter::new(client, env.tracking_relation.clone()))
            }
            BackendKind::Postgresql | BackendKind::Postgres | BackendKind::Greenplum => {
                let client = self.registry.postgres(&env.connection_params())?;
                Arc::new(PostgresAdapter::for_kind(
                    kind,
                    client,
                    env.tracking_relation.clone(),
                )?)
            }
            BackendKind::Filesystem => Arc::new(FilesystemAdapter::local(
                env.base_path.as_deref().unwrap_or(Path::new(".")),
            )),
        };
        Ok(adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    const YAML: &str = "
local:
  adapter: sqlite
  database: ':memory:'
again:
  adapter: sqlite
  database: ':memory:'
warehouse:
  adapter: greenplum
  database: warehouse
files:
  adapter: filesystem
  base_path: /tmp
nodb:
  adapter: postgres
odd:
  adapter: mongodb
";

    fn context() -> Context {
        Context::new(Config::from_yaml(YAML).unwrap())
    }

    #[test]
    fn test_adapter_kinds() {
        let ctx = context();
        assert_eq!(ctx.adapter("local").unwrap().kind(), BackendKind::Sqlite);
        assert_eq!(ctx.adapter("warehouse").unwrap().kind(), BackendKind::Greenplum);
        assert_eq!(ctx.adapter("files").unwrap().kind(), BackendKind::Filesystem);
    }

    #[test]
    fn test_same_target_shares_connection() {
        let ctx = context();
        ctx.adapter("local").unwrap();
        ctx.adapter("again").unwrap();
        assert_eq!(ctx.registry().len(), 1);

        ctx.adapter("warehouse").unwrap();
        assert_eq!(ctx.registry().len(), 2);
    }

    #[test]
    fn test_configuration_errors() {
        let ctx = context();
        assert!(matches!(ctx.adapter("odd"), Err(Error::Configuration(_))));
        assert!(matches!(ctx.adapter("nodb"), Err(Error::Configuration(_))));
        assert!(matches!(ctx.adapter("missing"), Err(Error::Configuration(_))));
    }
}
