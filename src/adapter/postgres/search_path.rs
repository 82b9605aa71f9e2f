//! Name resolution through the PostgreSQL `search_path`.

use crate::db::names::rank_by_search_order;
use crate::db::Session;
use crate::error::{Error, Result};
use crate::sql::{parse_single_value, quote_ident, quote_literal};
use tracing::warn;

/// Reads and temporarily narrows the session's search path.
#[derive(Clone)]
pub struct SearchPath {
    session: Session,
}

impl SearchPath {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// The raw `search_path` setting.
    pub fn current(&self) -> Result<String> {
        let rows = self.session.execute("show search_path")?;
        Ok(parse_single_value(&rows)?
            .map(|v| v.to_string())
            .unwrap_or_default())
    }

    pub fn current_user(&self) -> Result<String> {
        let rows = self.session.execute("select current_user")?;
        parse_single_value(&rows)?
            .map(|v| v.to_string())
            .ok_or_else(|| Error::Shape("row"))
    }

    /// Schema names in resolution order. A leading `"$user"` entry becomes the
    /// current user when a schema of that name exists, and is dropped otherwise.
    pub fn schemas(&self) -> Result<Vec<String>> {
        let mut entries = split_search_path(&self.current()?);

        if entries.first().is_some_and(|e| e == "\"$user\"" || e == "$user") {
            entries.remove(0);
            let user = self.current_user()?;
            let exists = self.session.execute(&format!(
                "select 1 from information_schema.schemata where schema_name = {}",
                quote_literal(&user)
            ))?;
            if !exists.is_empty() {
                entries.insert(0, user);
            }
        }

        Ok(entries.iter().map(|e| normalize(e)).collect())
    }

    /// First schema of the search path, where unqualified creates land.
    pub fn head(&self) -> Result<String> {
        self.schemas()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Configuration("search_path is empty".into()))
    }

    /// The schema, by search order, that holds a relation named `object`.
    /// Schemas outside the search path are considered after those in it.
    pub fn first_schema_for(&self, object: &str) -> Result<Option<String>> {
        let found = self
            .session
            .execute(&format!(
                "select table_schema from information_schema.tables where table_name = {}",
                quote_literal(object)
            ))?
            .first_column_text();
        if found.is_empty() {
            return Ok(None);
        }
        Ok(rank_by_search_order(&self.schemas()?, &found)
            .into_iter()
            .next())
    }

    /// Run `body` with the search path set to `schemas`, restoring the previous
    /// setting afterwards whether or not `body` succeeds.
    pub fn with_search_scope<T>(
        &self,
        schemas: &[String],
        body: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let original = self.current()?;
        let narrowed = schemas
            .iter()
            .map(|s| quote_ident(s))
            .collect::<Vec<_>>()
            .join(", ");
        self.session
            .execute(&format!("set search_path to {narrowed}"))?;

        let result = body();

        let restore = if original.trim().is_empty() {
            "set search_path to default".to_string()
        } else {
            format!("set search_path to {original}")
        };
        match (result, self.session.execute(&restore)) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(restore_err)) => {
                warn!("could not restore search_path after failure: {restore_err}");
                Err(e)
            }
        }
    }
}

/// Split a `search_path` value on commas outside double quotes.
pub fn split_search_path(raw: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in raw.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ',' if !quoted => {
                entries.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        entries.push(current.trim().to_string());
    }
    entries.retain(|e| !e.is_empty());
    entries
}

/// Quoted names keep their case; bare names fold to lower case.
fn normalize(entry: &str) -> String {
    match entry.strip_prefix('"').and_then(|e| e.strip_suffix('"')) {
        Some(inner) => inner.replace("\"\"", "\""),
        None => entry.to_lowercase(),
    }
}
