//! SQLite adapter.
//!
//! Attached databases act as schemas. Insert, update and delete are recorded
//! by per-table triggers; create, truncate and drop are recorded here when the
//! statement is issued.

use crate::adapter::Adapter;
use crate::config::BackendKind;
use crate::db::names::parse_qualified_name;
use crate::db::{Operation, RelationKind, Session, SharedClient, TrackedOperation, Vocabulary};
use crate::error::{Error, Result};
use crate::sql::{
    get_single_time, parse_single_value, quote_ident_always, quote_literal, BooleanConvention,
    Value,
};
use chrono::{DateTime, Utc};
use tracing::info;

/// Current UTC time with millisecond precision, from SQLite's own clock.
const NOW: &str = "strftime('%Y-%m-%d %H:%M:%f', 'now')";

const VOCABULARY: Vocabulary = Vocabulary::LOWERCASE;

pub struct SqliteAdapter {
    session: Session,
}

impl SqliteAdapter {
    pub fn new(client: SharedClient, tracking_relation: impl Into<String>) -> Self {
        Self {
            session: Session::new(client, tracking_relation),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn booleans(&self) -> BooleanConvention {
        BooleanConvention::Numeric
    }

    fn tracker_name(&self) -> &str {
        self.session.tracking_relation()
    }

    fn tracker(&self, schema: &str) -> String {
        qualify(schema, self.tracker_name())
    }

    /// `main` followed by attached databases in attach order.
    pub fn search_order(&self) -> Result<Vec<String>> {
        let rows = self.session.execute("pragma database_list")?;
        let mut schemas: Vec<(i64, String)> = rows
            .rows()
            .iter()
            .filter_map(|row| {
                let seq = match row.first() {
                    Some(Value::Integer(n)) => *n,
                    _ => return None,
                };
                let name = row.get(1)?.as_str()?.to_string();
                Some((seq, name))
            })
            .filter(|(_, name)| name != "temp")
            .collect();
        schemas.sort_by_key(|(seq, _)| *seq);
        Ok(schemas.into_iter().map(|(_, name)| name).collect())
    }

    fn default_schema(&self) -> Result<String> {
        Ok(self
            .search_order()?
            .into_iter()
            .next()
            .unwrap_or_else(|| "main".to_string()))
    }

    /// First schema in the search order holding a relation called `object`.
    pub fn first_schema_containing(&self, object: &str) -> Result<Option<String>> {
        for schema in self.search_order()? {
            if self.relation_exists_in(&schema, object, None)? {
                return Ok(Some(schema));
            }
        }
        Ok(None)
    }

    fn relation_exists_in(&self, schema: &str, object: &str, kind: Option<&str>) -> Result<bool> {
        let kind_filter = kind
            .map(|k| format!(" and type = {}", quote_literal(k)))
            .unwrap_or_else(|| " and type in ('table', 'view')".to_string());
        let rows = self.session.execute(&format!(
            "select exists (select 1 from {}.sqlite_master where name = {}{kind_filter})",
            quote_ident_always(schema),
            quote_literal(object),
        ))?;
        Ok(self.booleans().is_true_opt(parse_single_value(&rows)?))
    }

    fn tracking_in(&self, schema: &str) -> Result<bool> {
        self.relation_exists_in(schema, self.tracker_name(), Some("table"))
    }

    /// Schema that owns `name` for writes: the explicit one, the first one
    /// that already holds it, or the head of the search order.
    fn target(&self, name: &str) -> Result<(String, String)> {
        let (schema, object) = parse_qualified_name(name)?;
        let schema = match schema {
            Some(s) => s,
            None => match self.first_schema_containing(&object)? {
                Some(s) => s,
                None => self.default_schema()?,
            },
        };
        Ok((schema, object))
    }

    fn is_tracker(&self, object: &str) -> bool {
        object.eq_ignore_ascii_case(self.tracker_name())
    }

    fn trigger_name(object: &str, op: Operation) -> String {
        format!("datatask_{object}_{op}")
    }

    /// Each trigger replaces the table's tracked row, so writes are recorded
    /// even after the tracker has been emptied.
    fn create_tracking_triggers(&self, schema: &str, object: &str) -> Result<()> {
        for op in Operation::ROW_LEVEL {
            self.session.execute(&format!(
                "create trigger if not exists {trigger} after {op} on {table} begin \
                   delete from {tracker} where relation_name = {name} and relation_type = {kind}; \
                   insert into {tracker} values ({name}, {kind}, {operation}, {NOW}); \
                 end",
                trigger = qualify(schema, &Self::trigger_name(object, op)),
                table = quote_ident_always(object),
                tracker = quote_ident_always(self.tracker_name()),
                operation = quote_literal(VOCABULARY.operation(op)),
                name = quote_literal(object),
                kind = quote_literal(VOCABULARY.table),
            ))?;
        }
        Ok(())
    }

    fn track_creation(&self, schema: &str, object: &str) -> Result<()> {
        self.session.execute(&format!(
            "delete from {} where relation_name = {} and relation_type = {}",
            self.tracker(schema),
            quote_literal(object),
            quote_literal(VOCABULARY.table),
        ))?;
        self.session.execute(&format!(
            "insert into {} values ({}, {}, {}, {NOW})",
            self.tracker(schema),
            quote_literal(object),
            quote_literal(VOCABULARY.table),
            quote_literal(VOCABULARY.create),
        ))?;
        Ok(())
    }

    fn track_truncate(&self, schema: &str, object: &str) -> Result<()> {
        self.session.execute(&format!(
            "update {} set operation = {}, time = {NOW} \
             where relation_name = {} and relation_type = {}",
            self.tracker(schema),
            quote_literal(VOCABULARY.truncate),
            quote_literal(object),
            quote_literal(VOCABULARY.table),
        ))?;
        Ok(())
    }

    fn track_drop(&self, schema: &str, object: &str) -> Result<()> {
        self.session.execute(&format!(
            "delete from {} where relation_name = {} and relation_type = {}",
            self.tracker(schema),
            quote_literal(object),
            quote_literal(VOCABULARY.table),
        ))?;
        Ok(())
    }

    /// SQLite has no `drop ... cascade`; find views that read from `object`.
    fn views_reading(&self, schema: &str, object: &str) -> Result<Vec<String>> {
        let rows = self.session.execute(&format!(
            "select name, sql from {}.sqlite_master where type = 'view'",
            quote_ident_always(schema),
        ))?;
        Ok(rows
            .rows()
            .iter()
            .filter_map(|row| {
                let name = row.first()?.as_str()?;
                let sql = row.get(1)?.as_str()?;
                reads_from(sql, schema, object).then(|| name.to_string())
            })
            .collect())
    }

    fn drop_table_in(&self, schema: &str, object: &str) -> Result<()> {
        self.session
            .execute(&format!("drop table if exists {}", qualify(schema, object)))?;

        for view in self.views_reading(schema, object)? {
            self.drop_view_in(schema, &view)?;
        }

        if self.is_tracker(object) || !self.tracking_in(schema)? {
            return Ok(());
        }
        self.track_drop(schema, object)
    }

    fn drop_view_in(&self, schema: &str, object: &str) -> Result<()> {
        self.session
            .execute(&format!("drop view if exists {}", qualify(schema, object)))?;
        Ok(())
    }
}

/// Identifiers are always quoted: SQLite reserves words that PostgreSQL does not.
fn qualify(schema: &str, object: &str) -> String {
    format!("{}.{}", quote_ident_always(schema), quote_ident_always(object))
}

/// Whether a view's SQL names `object` after `from`, `join` or a comma in a
/// from list. Names qualified with another schema do not count.
fn reads_from(sql: &str, schema: &str, object: &str) -> bool {
    let mut in_from = false;
    let mut expect_table = false;
    for token in tokens(sql) {
        if expect_table {
            expect_table = false;
            if token != "(" && names_relation(&token, schema, object) {
                return true;
            }
            continue;
        }
        match token.as_str() {
            "from" => {
                in_from = true;
                expect_table = true;
            }
            "join" => expect_table = true,
            "," => expect_table = in_from,
            "select" | "where" | "group" | "order" | "having" | "limit" | "union" | "except"
            | "intersect" | "on" | "using" | ";" => in_from = false,
            _ => {}
        }
    }
    false
}

/// Lowercased whitespace-separated words, with punctuation split out.
fn tokens(sql: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut word = String::new();
    for c in sql.chars() {
        if c.is_whitespace() || matches!(c, ',' | '(' | ')' | ';') {
            if !word.is_empty() {
                out.push(std::mem::take(&mut word).to_lowercase());
            }
            if !c.is_whitespace() {
                out.push(c.to_string());
            }
        } else {
            word.push(c);
        }
    }
    if !word.is_empty() {
        out.push(word.to_lowercase());
    }
    out
}

fn names_relation(token: &str, schema: &str, object: &str) -> bool {
    let unquote = |s: &str| s.trim_matches(|c| matches!(c, '"' | '`' | '[' | ']')).to_string();
    let (qualifier, name) = match token.rsplit_once('.') {
        Some((q, n)) => (Some(unquote(q)), unquote(n)),
        None => (None, unquote(token)),
    };
    name.eq_ignore_ascii_case(object)
        && qualifier.map_or(true, |q| q.eq_ignore_ascii_case(schema))
}

impl Adapter for SqliteAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn is_tracking(&self, scope: Option<&str>) -> Result<bool> {
        let schema = match scope {
            Some(s) => s.to_string(),
            None => match self.first_schema_containing(self.tracker_name())? {
                Some(s) => s,
                None => return Ok(false),
            },
        };
        self.tracking_in(&schema)
    }

    fn set_up_tracking(&self, scope: Option<&str>, force: bool) -> Result<()> {
        let schema = match scope {
            Some(s) => s.to_string(),
            None => self.default_schema()?,
        };
        if !force && self.is_tracking(Some(&schema))? {
            return Ok(());
        }

        if force {
            self.session
                .execute(&format!("drop table if exists {}", self.tracker(&schema)))?;
        }
        self.session.execute(&format!(
            "create table if not exists {} {}",
            self.tracker(&schema),
            VOCABULARY.column_definitions()
        ))?;
        info!(%schema, "tracking set up");
        Ok(())
    }

    fn tear_down_tracking(&self, scope: Option<&str>) -> Result<()> {
        let schema = match scope {
            Some(s) => s.to_string(),
            None => match self.first_schema_containing(self.tracker_name())? {
                Some(s) => s,
                None => return Ok(()),
            },
        };

        let triggers = self.session.execute(&format!(
            "select name from {}.sqlite_master where type = 'trigger' and name like 'datatask\\_%' escape '\\'",
            quote_ident_always(&schema)
        ))?;
        for trigger in triggers.first_column_text() {
            self.session
                .execute(&format!("drop trigger if exists {}", qualify(&schema, &trigger)))?;
        }
        self.session
            .execute(&format!("drop table if exists {}", self.tracker(&schema)))?;
        info!(%schema, "tracking torn down");
        Ok(())
    }

    fn reset_tracking(&self, scope: Option<&str>) -> Result<()> {
        let schema = match scope {
            Some(s) => s.to_string(),
            None => self
                .first_schema_containing(self.tracker_name())?
                .ok_or_else(|| Error::TrackingNotSetUp {
                    scope: "any attached database".into(),
                })?,
        };
        self.session
            .execute(&format!("delete from {}", self.tracker(&schema)))?;
        Ok(())
    }

    fn data_exists(&self, name: &str, schemas: Option<&[String]>) -> Result<bool> {
        let (schema, object) = parse_qualified_name(name)?;
        let candidates = match (schema, schemas) {
            (Some(s), _) => vec![s],
            (None, Some(list)) => list.to_vec(),
            (None, None) => self.search_order()?,
        };
        for schema in candidates {
            if self.relation_exists_in(&schema, &object, Some("table"))? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn data_mtime(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        let (schema, object) = parse_qualified_name(name)?;
        let schema = match schema {
            Some(s) => s,
            None => match self.first_schema_containing(&object)? {
                Some(s) => s,
                None => return Ok(None),
            },
        };
        if !self.relation_exists_in(&schema, &object, Some("table"))? {
            return Ok(None);
        }
        if !self.tracking_in(&schema)? {
            return Err(Error::TrackingNotSetUp { scope: schema });
        }

        get_single_time(&self.session.execute(&format!(
            "select max(time) from {} where relation_name = {}",
            self.tracker(&schema),
            quote_literal(&object)
        ))?)
    }

    fn create_data(
        &self,
        name: &str,
        definition: Option<&str>,
        column_spec: &str,
        track: bool,
    ) -> Result<()> {
        let (schema, object) = parse_qualified_name(name)?;
        let schema = match schema {
            Some(s) => s,
            None => self.default_schema()?,
        };
        let qualified = qualify(&schema, &object);

        if track && !self.tracking_in(&schema)? {
            self.set_up_tracking(Some(&schema), false)?;
        }

        self.drop_table_in(&schema, &object)?;
        // SQLite takes no column list on `create table ... as`.
        let ddl = match definition {
            Some(select) => format!("create table {qualified} as {select}"),
            None => format!("create table {qualified} {column_spec}"),
        };
        self.session.execute(&ddl)?;

        if track {
            self.create_tracking_triggers(&schema, &object)?;
            self.track_creation(&schema, &object)?;
        }
        Ok(())
    }

    fn drop_data(&self, name: &str) -> Result<()> {
        let (schema, object) = self.target(name)?;
        self.drop_table_in(&schema, &object)
    }

    fn truncate_data(&self, name: &str) -> Result<()> {
        let (schema, object) = self.target(name)?;
        if self.is_tracker(&object) {
            return Ok(());
        }
        self.session
            .execute(&format!("delete from {}", qualify(&schema, &object)))?;
        if self.tracking_in(&schema)? {
            self.track_truncate(&schema, &object)?;
        }
        Ok(())
    }

    fn tracked_operations(&self, name: &str) -> Result<Vec<TrackedOperation>> {
        let (schema, object) = self.target(name)?;
        if !self.tracking_in(&schema)? {
            return Err(Error::TrackingNotSetUp { scope: schema });
        }
        let rows = self.session.execute(&format!(
            "select relation_name, relation_type, operation, time from {} \
             where relation_name = {} order by time",
            self.tracker(&schema),
            quote_literal(&object)
        ))?;
        rows.rows()
            .iter()
            .map(|row| TrackedOperation::from_row(row, &VOCABULARY))
            .collect()
    }

    fn transaction(&self, commit: bool, body: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.session.with_transaction(commit, body)
    }

    fn create_view(&self, name: &str, definition: &str) -> Result<()> {
        let (schema, object) = parse_qualified_name(name)?;
        let schema = match schema {
            Some(s) => s,
            None => self.default_schema()?,
        };
        self.drop_view_in(&schema, &object)?;
        self.session.execute(&format!(
            "create view {} as {definition}",
            qualify(&schema, &object)
        ))?;
        Ok(())
    }

    fn drop_view(&self, name: &str) -> Result<()> {
        let (schema, object) = self.target(name)?;
        self.drop_view_in(&schema, &object)
    }

    fn view_exists(&self, name: &str) -> Result<bool> {
        let (schema, object) = parse_qualified_name(name)?;
        let candidates = match schema {
            Some(s) => vec![s],
            None => self.search_order()?,
        };
        let view = VOCABULARY.relation_kind(RelationKind::View);
        for schema in candidates {
            if self.relation_exists_in(&schema, &object, Some(view))? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
