//! PostgreSQL-family adapter.
//!
//! One facade serves three backends that differ only in their [`Recorder`]:
//! plain rules (`postgresql`), rules plus truncate and drop triggers
//! (`postgres`) and Greenplum's system catalog (`greenplum`). Unqualified names
//! resolve through the session's `search_path`.

pub mod greenplum;
pub mod recorder;
pub mod search_path;

pub use greenplum::CatalogRecorder;
pub use recorder::{Recorder, RuleRecorder, TriggerRecorder};
pub use search_path::SearchPath;

use crate::adapter::Adapter;
use crate::config::BackendKind;
use crate::db::names::parse_qualified_name;
use crate::db::{Session, SharedClient, TrackedOperation};
use crate::error::{Error, Result};
use crate::sql::{
    get_single_time, parse_single_value, quote_ident, quote_literal, quote_literal_list,
    BooleanConvention,
};
use chrono::{DateTime, Utc};
use recorder::{qualified, tracker, VOCABULARY};
use tracing::info;

pub struct PostgresAdapter {
    session: Session,
    search_path: SearchPath,
    recorder: Box<dyn Recorder>,
}

impl PostgresAdapter {
    pub fn new(
        client: SharedClient,
        tracking_relation: impl Into<String>,
        recorder: Box<dyn Recorder>,
    ) -> Self {
        let session = Session::new(client, tracking_relation);
        Self {
            search_path: SearchPath::new(session.clone()),
            session,
            recorder,
        }
    }

    /// Build the adapter for one of the PostgreSQL-family backend kinds.
    pub fn for_kind(
        kind: BackendKind,
        client: SharedClient,
        tracking_relation: impl Into<String>,
    ) -> Result<Self> {
        let recorder: Box<dyn Recorder> = match kind {
            BackendKind::Postgresql => Box::new(RuleRecorder),
            BackendKind::Postgres => Box::new(TriggerRecorder),
            BackendKind::Greenplum => Box::new(CatalogRecorder),
            other => {
                return Err(Error::Configuration(format!(
                    "{other} is not a PostgreSQL-family backend"
                )));
            }
        };
        Ok(Self::new(client, tracking_relation, recorder))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn search_path(&self) -> &SearchPath {
        &self.search_path
    }

    pub fn booleans(&self) -> BooleanConvention {
        BooleanConvention::SingleLetter
    }

    fn tracker_name(&self) -> &str {
        self.session.tracking_relation()
    }

    fn is_tracker(&self, object: &str) -> bool {
        object.eq_ignore_ascii_case(self.tracker_name())
    }

    /// Explicit scope, else the schema already holding the tracking relation.
    fn tracking_scope(&self, scope: Option<&str>) -> Result<Option<String>> {
        match scope {
            Some(s) => Ok(Some(s.to_string())),
            None => self.search_path.first_schema_for(self.tracker_name()),
        }
    }

    /// Schema of an existing relation: the explicit one or the first by search order.
    fn locate(&self, name: &str) -> Result<(Option<String>, String)> {
        let (schema, object) = parse_qualified_name(name)?;
        let schema = match schema {
            Some(s) => Some(s),
            None => self.search_path.first_schema_for(&object)?,
        };
        Ok((schema, object))
    }

    fn relation_exists(
        &self,
        name: &str,
        table_type: &str,
        schemas: Option<&[String]>,
    ) -> Result<bool> {
        let (schema, object) = parse_qualified_name(name)?;
        self.relation_exists_in(schema, &object, table_type, schemas)
    }

    /// Schema and object already split; schema names may contain dots.
    fn relation_exists_in(
        &self,
        schema: Option<String>,
        object: &str,
        table_type: &str,
        schemas: Option<&[String]>,
    ) -> Result<bool> {
        let schema_condition = match (schema, schemas) {
            (Some(s), _) => format!("table_schema = {}", quote_literal(&s)),
            (None, Some(list)) if list.is_empty() => return Ok(false),
            (None, Some(list)) => format!("table_schema in ({})", quote_literal_list(list)),
            (None, None) => {
                let order = self.search_path.schemas()?;
                if order.is_empty() {
                    return Ok(false);
                }
                format!("table_schema in ({})", quote_literal_list(&order))
            }
        };

        let rows = self.session.execute(&format!(
            "select exists(
               select 1 from information_schema.tables
               where table_name = {} and table_type = {} and {schema_condition}
             )",
            quote_literal(object),
            quote_literal(table_type),
        ))?;
        Ok(self
            .booleans()
            .is_true_opt(parse_single_value(&rows)?))
    }

    fn drop_relation(&self, what: &str, schema: Option<&str>, object: &str) -> Result<()> {
        let target = match schema {
            Some(s) => qualified(s, object),
            None => quote_ident(object),
        };
        self.session
            .execute(&format!("drop {what} if exists {target} cascade"))?;
        Ok(())
    }

    fn drop_table_in(&self, schema: &str, object: &str) -> Result<()> {
        self.drop_relation("table", Some(schema), object)?;
        if self.is_tracker(object) || !self.recorder.store_exists(&self.session, schema)? {
            return Ok(());
        }
        self.recorder.record_drop(&self.session, schema, object)
    }
}

impl Adapter for PostgresAdapter {
    fn kind(&self) -> BackendKind {
        self.recorder.kind()
    }

    fn is_tracking(&self, scope: Option<&str>) -> Result<bool> {
        let Some(schema) = self.tracking_scope(scope)? else {
            return Ok(false);
        };
        Ok(self.recorder.store_exists(&self.session, &schema)?
            && self.recorder.is_installed(&self.session, &schema)?)
    }

    fn set_up_tracking(&self, scope: Option<&str>, force: bool) -> Result<()> {
        let schema = match scope {
            Some(s) => s.to_string(),
            None => self.search_path.head()?,
        };
        if !force && self.is_tracking(Some(&schema))? {
            return Ok(());
        }

        self.search_path
            .with_search_scope(std::slice::from_ref(&schema), || {
                if force {
                    self.recorder.drop_store(&self.session, &schema)?;
                }
                self.recorder.create_store(&self.session, &schema)?;
                self.recorder.install(&self.session, &schema)
            })?;
        info!(%schema, kind = %self.kind(), "tracking set up");
        Ok(())
    }

    fn tear_down_tracking(&self, scope: Option<&str>) -> Result<()> {
        let Some(schema) = self.tracking_scope(scope)? else {
            return Ok(());
        };
        self.recorder.uninstall(&self.session, &schema)?;
        self.recorder.drop_store(&self.session, &schema)?;
        info!(%schema, "tracking torn down");
        Ok(())
    }

    fn tear_down_global_tracking(&self) -> Result<()> {
        self.recorder.uninstall_global(&self.session)
    }

    fn reset_tracking(&self, scope: Option<&str>) -> Result<()> {
        let schema = self
            .tracking_scope(scope)?
            .ok_or_else(|| Error::TrackingNotSetUp {
                scope: "the search path".into(),
            })?;
        self.recorder.clear_store(&self.session, &schema)
    }

    fn data_exists(&self, name: &str, schemas: Option<&[String]>) -> Result<bool> {
        self.relation_exists(name, VOCABULARY.table, schemas)
    }

    fn data_mtime(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        let (schema, object) = self.locate(name)?;
        let Some(schema) = schema else {
            return Ok(None);
        };
        if !self.relation_exists_in(Some(schema.clone()), &object, VOCABULARY.table, None)? {
            return Ok(None);
        }
        if !self.recorder.store_exists(&self.session, &schema)? {
            return Err(Error::TrackingNotSetUp { scope: schema });
        }

        get_single_time(&self.session.execute(&format!(
            "select max(time) from {} where relation_name = {}",
            tracker(&self.session, &schema),
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
            None => self.search_path.head()?,
        };

        self.search_path
            .with_search_scope(std::slice::from_ref(&schema), || {
                if track && !self.is_tracking(Some(&schema))? {
                    self.set_up_tracking(Some(&schema), false)?;
                }

                let table = qualified(&schema, &object);
                self.drop_table_in(&schema, &object)?;
                let as_clause = definition
                    .map(|d| format!(" as {d}"))
                    .unwrap_or_default();
                self.session
                    .execute(&format!("create table {table} {column_spec}{as_clause}"))?;

                if track {
                    self.recorder.track_relation(&self.session, &schema, &object)?;
                    self.recorder.record_create(&self.session, &schema, &object)?;
                }
                Ok(())
            })
    }

    fn drop_data(&self, name: &str) -> Result<()> {
        match self.locate(name)? {
            (Some(schema), object) => self.drop_table_in(&schema, &object),
            (None, object) => self.drop_relation("table", None, &object),
        }
    }

    fn truncate_data(&self, name: &str) -> Result<()> {
        let (_, object) = parse_qualified_name(name)?;
        if self.is_tracker(&object) {
            return Ok(());
        }
        let (schema, object) = self.locate(name)?;
        let Some(schema) = schema else {
            // Nothing by that name; let the server report it.
            self.session
                .execute(&format!("truncate table {}", quote_ident(&object)))?;
            return Ok(());
        };

        self.session
            .execute(&format!("truncate table {}", qualified(&schema, &object)))?;
        if self.recorder.store_exists(&self.session, &schema)? {
            self.recorder.record_truncate(&self.session, &schema, &object)?;
        }
        Ok(())
    }

    fn tracked_operations(&self, name: &str) -> Result<Vec<TrackedOperation>> {
        let (schema, object) = self.locate(name)?;
        let schema = match schema {
            Some(s) => s,
            None => self.search_path.head()?,
        };
        if !self.recorder.store_exists(&self.session, &schema)? {
            return Err(Error::TrackingNotSetUp { scope: schema });
        }

        let rows = self.session.execute(&format!(
            "select relation_name, relation_type, operation, time from {} \
             where relation_name = {} order by time",
            tracker(&self.session, &schema),
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
            None => self.search_path.head()?,
        };
        self.drop_relation("view", Some(schema.as_str()), &object)?;
        self.session.execute(&format!(
            "create view {} as {definition}",
            qualified(&schema, &object)
        ))?;
        Ok(())
    }

    fn drop_view(&self, name: &str) -> Result<()> {
        let (schema, object) = self.locate(name)?;
        self.drop_relation("view", schema.as_deref(), &object)
    }

    fn view_exists(&self, name: &str) -> Result<bool> {
        self.relation_exists(name, VOCABULARY.view, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{ScriptedClient, StatementLog};
    use crate::db::TRACKING_RELATION;
    use crate::sql::{ResultSet, Value};
    use std::collections::HashSet;

    /// A catalog holding `(schema, table)` pairs, with `public` as the only
    /// schema on the search path. Function and event trigger lookups answer
    /// `installed`.
    fn catalog(tables: &[(&str, &str)], installed: bool) -> ScriptedClient {
        catalog_on("\"$user\", public", tables, installed)
    }

    /// Like [`catalog`], with `path` as the `search_path` setting.
    fn catalog_on(path: &str, tables: &[(&str, &str)], installed: bool) -> ScriptedClient {
        let path = path.to_string();
        let tables: HashSet<(String, String)> = tables
            .iter()
            .map(|(s, t)| (s.to_string(), t.to_string()))
            .collect();

        ScriptedClient::new(move |sql| {
            let name = literal_after(sql, "table_name = ");
            Ok(if sql == "show search_path" {
                ResultSet::single(path.as_str())
            } else if sql == "select current_user" {
                ResultSet::single("alice")
            } else if sql.contains("information_schema.schemata") {
                ResultSet::empty()
            } else if sql.starts_with("select table_schema") {
                ResultSet::column(
                    tables
                        .iter()
                        .filter(|(_, t)| Some(t.as_str()) == name.as_deref())
                        .map(|(s, _)| s.clone())
                        .collect::<Vec<_>>(),
                )
            } else if sql.starts_with("select exists") {
                let found = tables.iter().any(|(s, t)| {
                    Some(t.as_str()) == name.as_deref() && sql.contains(&format!("'{s}'"))
                });
                ResultSet::single(if found { "t" } else { "f" })
            } else if sql.starts_with("select count(*) from information_schema.tables") {
                let schema = literal_after(sql, "table_schema = ");
                let found = tables
                    .iter()
                    .any(|(s, t)| Some(s) == schema.as_ref() && Some(t) == name.as_ref());
                ResultSet::single(found as i64)
            } else if sql.contains("pg_catalog") {
                ResultSet::single(installed as i64)
            } else if sql.starts_with("select max(time)") {
                ResultSet::single("2024-05-01 12:00:00.123456+00")
            } else {
                ResultSet::empty()
            })
        })
    }

    fn literal_after(sql: &str, marker: &str) -> Option<String> {
        let rest = &sql[sql.find(marker)? + marker.len()..];
        let rest = rest.strip_prefix('\'')?;
        Some(rest[..rest.find('\'')?].to_string())
    }

    fn adapter(
        kind: BackendKind,
        tables: &[(&str, &str)],
        installed: bool,
    ) -> (PostgresAdapter, StatementLog) {
        let client = catalog(tables, installed);
        let log = client.log();
        let adapter = PostgresAdapter::for_kind(kind, client.shared(), TRACKING_RELATION).unwrap();
        (adapter, log)
    }

    #[test]
    fn test_for_kind_rejects_other_backends() {
        let client = catalog(&[], true);
        assert!(matches!(
            PostgresAdapter::for_kind(BackendKind::Sqlite, client.shared(), TRACKING_RELATION),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_not_tracking_without_relation() {
        let (a, _) = adapter(BackendKind::Postgres, &[], true);
        assert!(!a.is_tracking(None).unwrap());
    }

    #[test]
    fn test_partial_setup_reports_not_tracking() {
        let (a, _) = adapter(BackendKind::Postgres, &[("public", TRACKING_RELATION)], false);
        assert!(!a.is_tracking(None).unwrap());

        let (a, _) = adapter(BackendKind::Postgres, &[("public", TRACKING_RELATION)], true);
        assert!(a.is_tracking(None).unwrap());
        assert!(a.is_tracking(Some("public")).unwrap());
    }

    #[test]
    fn test_set_up_is_noop_when_tracking() {
        let (a, log) = adapter(BackendKind::Postgres, &[("public", TRACKING_RELATION)], true);
        a.set_up_tracking(None, false).unwrap();
        assert!(!log.contains("create table"));
        assert!(!log.contains("set search_path"));
    }

    #[test]
    fn test_set_up_scopes_search_path() {
        let (a, log) = adapter(BackendKind::Postgres, &[], false);
        a.set_up_tracking(Some("s1"), false).unwrap();

        let set = log.position("set search_path to s1").unwrap();
        let create = log
            .position("create table if not exists s1.last_operations (relation_name text, relation_type text, operation text, time timestamp with time zone)")
            .unwrap();
        let restore = log.position("set search_path to \"$user\", public").unwrap();
        assert!(set < create && create < restore);
        assert!(log.contains("create event trigger datatask_track_drop_trigger"));
    }

    #[test]
    fn test_force_set_up_recreates_store() {
        let (a, log) = adapter(BackendKind::Postgresql, &[("public", TRACKING_RELATION)], true);
        a.set_up_tracking(None, true).unwrap();
        let drop = log.position("drop table if exists public.last_operations cascade").unwrap();
        let create = log.position("create table if not exists public.last_operations").unwrap();
        assert!(drop < create);
    }

    #[test]
    fn test_create_with_rules_records_create() {
        let (a, log) = adapter(BackendKind::Postgresql, &[("public", TRACKING_RELATION)], true);
        a.create_data("t1", None, "(var1 text)", true).unwrap();

        assert!(log.contains("drop table if exists public.t1 cascade"));
        assert!(log.contains("create table public.t1 (var1 text)"));
        assert_eq!(log.count("create or replace rule"), 3);
        assert!(log.contains("'CREATE', clock_timestamp()"));
        assert!(!log.contains("create trigger"));
    }

    #[test]
    fn test_create_with_triggers_installs_truncate_trigger() {
        let (a, log) = adapter(BackendKind::Postgres, &[("public", TRACKING_RELATION)], true);
        a.create_data("s1.t1", Some("select 1 as n"), "", true).unwrap();

        assert!(log.contains("create table s1.t1 as select 1 as n"));
        assert!(log.contains("create trigger datatask_track_truncate_t1 after truncate on s1.t1"));
        // s1 has no tracking relation yet, so the first tracked create sets it up.
        assert!(log.contains("create table if not exists s1.last_operations"));
    }

    #[test]
    fn test_untracked_create_skips_recorder() {
        let (a, log) = adapter(BackendKind::Postgres, &[], false);
        a.create_data("t1", None, "(var1 text)", false).unwrap();
        assert!(!log.contains("last_operations ("));
        assert!(!log.contains("create or replace rule"));
    }

    #[test]
    fn test_drop_records_only_for_rules() {
        let tables = [("public", TRACKING_RELATION), ("public", "t1")];

        let (a, log) = adapter(BackendKind::Postgresql, &tables, true);
        a.drop_data("t1").unwrap();
        assert!(log.contains("drop table if exists public.t1 cascade"));
        assert!(log.contains("delete from public.last_operations where relation_name = 't1'"));

        let (a, log) = adapter(BackendKind::Postgres, &tables, true);
        a.drop_data("t1").unwrap();
        assert!(!log.contains("delete from public.last_operations"));
    }

    #[test]
    fn test_dropping_tracker_keeps_rows() {
        let (a, log) = adapter(BackendKind::Postgresql, &[("public", TRACKING_RELATION)], true);
        a.drop_data(TRACKING_RELATION).unwrap();
        assert!(log.contains("drop table if exists public.last_operations cascade"));
        assert!(!log.contains("delete from"));
    }

    #[test]
    fn test_truncate_tracker_is_noop() {
        let (a, log) = adapter(BackendKind::Postgresql, &[("public", TRACKING_RELATION)], true);
        a.truncate_data(TRACKING_RELATION).unwrap();
        assert!(!log.contains("truncate"));
    }

    #[test]
    fn test_truncate_updates_row_for_rules() {
        let tables = [("public", TRACKING_RELATION), ("public", "t1")];
        let (a, log) = adapter(BackendKind::Postgresql, &tables, true);
        a.truncate_data("t1").unwrap();
        assert!(log.contains("truncate table public.t1"));
        assert!(log.contains("update public.last_operations set operation = 'TRUNCATE'"));
    }

    #[test]
    fn test_mtime_of_missing_relation_is_none() {
        let (a, log) = adapter(BackendKind::Postgres, &[("public", TRACKING_RELATION)], true);
        assert_eq!(a.data_mtime("t1").unwrap(), None);
        assert!(!log.contains("max(time)"));
    }

    #[test]
    fn test_mtime_without_tracking_errors() {
        let (a, _) = adapter(BackendKind::Postgres, &[("public", "t1")], true);
        assert!(matches!(
            a.data_mtime("t1"),
            Err(Error::TrackingNotSetUp { scope }) if scope == "public"
        ));
    }

    #[test]
    fn test_mtime_reads_tracker_in_owning_schema() {
        let tables = [("public", TRACKING_RELATION), ("public", "t1")];
        let (a, log) = adapter(BackendKind::Postgres, &tables, true);
        let t = a.data_mtime("t1").unwrap().unwrap();
        assert_eq!(t.to_rfc3339(), "2024-05-01T12:00:00.123456+00:00");
        assert!(log.contains("select max(time) from public.last_operations where relation_name = 't1'"));
    }

    #[test]
    fn test_schema_names_with_dots() {
        let tables = [("my.schema", TRACKING_RELATION), ("my.schema", "t1")];
        let client = catalog_on("\"my.schema\", public", &tables, true);
        let log = client.log();
        let a = PostgresAdapter::for_kind(BackendKind::Postgresql, client.shared(), TRACKING_RELATION)
            .unwrap();

        assert!(a.data_mtime("t1").unwrap().is_some());
        assert!(log.contains("select max(time) from \"my.schema\".last_operations"));

        a.create_data("t1", None, "(n integer)", true).unwrap();
        assert!(log.contains("drop table if exists \"my.schema\".t1 cascade"));
        assert!(log.contains("create table \"my.schema\".t1 (n integer)"));

        a.create_view("v1", "select * from t1").unwrap();
        assert!(log.contains("drop view if exists \"my.schema\".v1 cascade"));
    }

    #[test]
    fn test_exists_limited_to_schemas() {
        let (a, _) = adapter(BackendKind::Postgres, &[("s2", "t1")], true);
        assert!(!a.data_exists("t1", None).unwrap());
        assert!(a.data_exists("t1", Some(&["s2".to_string()])).unwrap());
        assert!(a.data_exists("s2.t1", None).unwrap());
        assert!(!a.data_exists("t1", Some(&[])).unwrap());
    }

    #[test]
    fn test_tear_down_scope() {
        let (a, log) = adapter(BackendKind::Postgres, &[("public", TRACKING_RELATION)], false);
        a.tear_down_tracking(None).unwrap();
        assert!(log.contains("drop function if exists public.datatask_track_truncate() cascade"));
        assert!(log.contains("drop table if exists public.last_operations cascade"));
        assert!(!log.contains("drop event trigger"));

        log.clear();
        a.tear_down_global_tracking().unwrap();
        assert!(log.contains("drop event trigger if exists datatask_track_drop_trigger"));
    }

    #[test]
    fn test_reset_requires_tracking() {
        let (a, _) = adapter(BackendKind::Postgres, &[], true);
        assert!(matches!(
            a.reset_tracking(None),
            Err(Error::TrackingNotSetUp { .. })
        ));

        let (a, log) = adapter(BackendKind::Postgres, &[("public", TRACKING_RELATION)], true);
        a.reset_tracking(None).unwrap();
        assert!(log.contains("truncate table public.last_operations"));
    }

    #[test]
    fn test_greenplum_setup_and_create() {
        let (a, log) = adapter(BackendKind::Greenplum, &[], true);
        a.create_data("t1", None, "(var1 text)", true).unwrap();

        assert!(log.contains("create or replace view public.last_operations as"));
        assert!(!log.contains("'CREATE', clock_timestamp()"));
        assert!(!log.contains("create trigger"));
        assert_eq!(a.kind(), BackendKind::Greenplum);
    }

    #[test]
    fn test_backend_failure_rolls_back() {
        let client = ScriptedClient::new(|sql| {
            if sql.starts_with("insert") {
                Err(Error::Backend(crate::error::BackendError::new(
                    "postgres",
                    crate::error::BackendErrorKind::UndefinedRelation,
                    "relation \"last_operations\" does not exist",
                )))
            } else {
                Ok(ResultSet::single(Value::Null))
            }
        });
        let log = client.log();
        let a = PostgresAdapter::for_kind(BackendKind::Postgresql, client.shared(), TRACKING_RELATION)
            .unwrap();

        let result = crate::adapter::with_transaction(&a, true, || {
            a.session().execute("insert into t1 values (1)")
        });
        assert!(matches!(result, Err(Error::Backend(_))));
        assert_eq!(log.statements()[..3], ["begin", "insert into t1 values (1)", "rollback"]);
    }
}
