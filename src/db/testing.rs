//! In-process client for exercising adapters without a server.

use crate::db::{Client, SharedClient};
use crate::error::Result;
use crate::sql::ResultSet;
use std::sync::{Arc, Mutex};

type Responder = Box<dyn FnMut(&str) -> Result<ResultSet> + Send>;

/// Every statement a `ScriptedClient` saw, whitespace-collapsed.
#[derive(Clone, Default)]
pub(crate) struct StatementLog(Arc<Mutex<Vec<String>>>);

impl StatementLog {
    pub fn statements(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.statements().iter().filter(|s| s.contains(needle)).count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.count(needle) > 0
    }

    /// Position of the first statement containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.statements().iter().position(|s| s.contains(needle))
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// A client that answers from a closure and records what it was asked.
pub(crate) struct ScriptedClient {
    responder: Responder,
    log: StatementLog,
}

impl ScriptedClient {
    pub fn new(responder: impl FnMut(&str) -> Result<ResultSet> + Send + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            log: StatementLog::default(),
        }
    }

    pub fn log(&self) -> StatementLog {
        self.log.clone()
    }

    pub fn shared(self) -> SharedClient {
        Arc::new(Mutex::new(self))
    }
}

impl Client for ScriptedClient {
    fn backend(&self) -> &'static str {
        "scripted"
    }

    fn execute(&mut self, sql: &str) -> Result<ResultSet> {
        let compact = sql.split_whitespace().collect::<Vec<_>>().join(" ");
        self.log.0.lock().unwrap().push(compact.clone());
        (self.responder)(&compact)
    }
}
