//! Operation recorders: how each PostgreSQL-family backend keeps the tracking
//! relation current.
//!
//! Every recorder leaves one row per relation describing its latest mutating
//! operation. They differ in which operations the database records on its own
//! and which the adapter records when it issues the statement.

use crate::config::BackendKind;
use crate::db::{Operation, Session, Vocabulary};
use crate::error::Result;
use crate::sql::{get_single_int, quote_ident, quote_literal};
use tracing::info;

pub(crate) const VOCABULARY: Vocabulary = Vocabulary::POSTGRES;

const TRUNCATE_FUNCTION: &str = "datatask_track_truncate";
const DROP_FUNCTION: &str = "datatask_track_drop";
const DROP_EVENT_TRIGGER: &str = "datatask_track_drop_trigger";

/// Backend-side half of change tracking.
pub trait Recorder: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Create the tracking relation in `schema` unless it already exists.
    fn create_store(&self, session: &Session, schema: &str) -> Result<()> {
        session.execute(&format!(
            "create table if not exists {} {}",
            tracker(session, schema),
            VOCABULARY.column_definitions()
        ))?;
        Ok(())
    }

    fn drop_store(&self, session: &Session, schema: &str) -> Result<()> {
        session.execute(&format!(
            "drop table if exists {} cascade",
            tracker(session, schema)
        ))?;
        Ok(())
    }

    fn clear_store(&self, session: &Session, schema: &str) -> Result<()> {
        session.execute(&format!("truncate table {}", tracker(session, schema)))?;
        Ok(())
    }

    fn store_exists(&self, session: &Session, schema: &str) -> Result<bool> {
        relation_exists(session, schema, session.tracking_relation(), VOCABULARY.table)
    }

    /// Whether the artifacts beyond the tracking relation are all present.
    fn is_installed(&self, _session: &Session, _schema: &str) -> Result<bool> {
        Ok(true)
    }

    /// Install per-scope artifacts. Must be safe to repeat.
    fn install(&self, _session: &Session, _schema: &str) -> Result<()> {
        Ok(())
    }

    /// Remove per-scope artifacts.
    fn uninstall(&self, _session: &Session, _schema: &str) -> Result<()> {
        Ok(())
    }

    /// Remove artifacts shared by every scope.
    fn uninstall_global(&self, _session: &Session) -> Result<()> {
        Ok(())
    }

    /// Attach tracking to a newly created table.
    fn track_relation(&self, session: &Session, schema: &str, object: &str) -> Result<()> {
        create_rules(session, schema, object)
    }

    fn record_create(&self, session: &Session, schema: &str, object: &str) -> Result<()> {
        upsert(session, schema, object, Operation::Create)
    }

    fn record_truncate(&self, session: &Session, schema: &str, object: &str) -> Result<()>;

    fn record_drop(&self, session: &Session, schema: &str, object: &str) -> Result<()>;
}

/// Insert, update and delete are caught by rules; create, truncate and drop
/// are recorded by the adapter.
pub struct RuleRecorder;

impl Recorder for RuleRecorder {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgresql
    }

    fn record_truncate(&self, session: &Session, schema: &str, object: &str) -> Result<()> {
        session.execute(&format!(
            "update {} set operation = {}, time = clock_timestamp() \
             where relation_name = {} and relation_type = {}",
            tracker(session, schema),
            quote_literal(VOCABULARY.truncate),
            quote_literal(object),
            quote_literal(VOCABULARY.table),
        ))?;
        Ok(())
    }

    fn record_drop(&self, session: &Session, schema: &str, object: &str) -> Result<()> {
        delete_row(session, schema, object)
    }
}

/// Rules for row changes, a per-table truncate trigger and one database-wide
/// event trigger that forgets dropped tables in whichever schema tracks them.
pub struct TriggerRecorder;

impl TriggerRecorder {
    fn create_functions(session: &Session, schema: &str) -> Result<()> {
        let table = quote_literal(VOCABULARY.table);
        let tracker = tracker(session, schema);

        session.execute(&format!(
            "create or replace function {function}() returns trigger as
            $$
              begin
                delete from {tracker}
                  where relation_name = TG_TABLE_NAME and relation_type = {table};
                insert into {tracker}
                  values (TG_TABLE_NAME, {table}, {truncate}, clock_timestamp());
                return null;
              end;
            $$ language plpgsql",
            function = qualified(schema, TRUNCATE_FUNCTION),
            truncate = quote_literal(VOCABULARY.truncate),
        ))?;

        session.execute(&format!(
            "create or replace function {function}() returns event_trigger as
            $fn$
              declare
                obj record;
                tracked boolean;
              begin
                for obj in select * from pg_event_trigger_dropped_objects()
                loop
                  if obj.schema_name is not null and obj.object_type = 'table' then
                    select exists(
                      select 1 from information_schema.tables
                      where table_schema = obj.schema_name and table_name = {relation}
                    ) into tracked;

                    if tracked then
                      execute 'delete from '
                        || quote_ident(obj.schema_name) || '.' || quote_ident({relation})
                        || ' where relation_name = ' || quote_literal(obj.object_name)
                        || ' and relation_type = ' || quote_literal({table});
                    end if;
                  end if;
                end loop;
              end;
            $fn$ language plpgsql",
            function = qualified(schema, DROP_FUNCTION),
            relation = quote_literal(session.tracking_relation()),
        ))?;
        Ok(())
    }

    fn event_trigger_exists(session: &Session) -> Result<bool> {
        let n = get_single_int(&session.execute(&format!(
            "select count(*) from pg_catalog.pg_event_trigger where evtname = {}",
            quote_literal(DROP_EVENT_TRIGGER)
        ))?)?;
        Ok(n.unwrap_or(0) > 0)
    }

    /// Whether the event trigger calls the drop function living in `schema`.
    fn event_trigger_uses(session: &Session, schema: &str) -> Result<bool> {
        let n = get_single_int(&session.execute(&format!(
            "select count(*)
             from pg_catalog.pg_event_trigger pe
               join pg_catalog.pg_proc pp on (pe.evtfoid = pp.oid)
               join pg_catalog.pg_namespace pn on (pp.pronamespace = pn.oid)
             where pe.evtname = {} and pn.nspname = {}",
            quote_literal(DROP_EVENT_TRIGGER),
            quote_literal(schema),
        ))?)?;
        Ok(n.unwrap_or(0) > 0)
    }
}

impl Recorder for TriggerRecorder {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn is_installed(&self, session: &Session, schema: &str) -> Result<bool> {
        Ok(function_exists(session, schema, TRUNCATE_FUNCTION)?
            && function_exists(session, schema, DROP_FUNCTION)?
            && Self::event_trigger_exists(session)?)
    }

    fn install(&self, session: &Session, schema: &str) -> Result<()> {
        Self::create_functions(session, schema)?;
        session.execute(&format!(
            "drop event trigger if exists {}",
            quote_ident(DROP_EVENT_TRIGGER)
        ))?;
        session.execute(&format!(
            "create event trigger {} on sql_drop when tag in ('DROP TABLE') \
             execute procedure {}()",
            quote_ident(DROP_EVENT_TRIGGER),
            qualified(schema, DROP_FUNCTION),
        ))?;
        Ok(())
    }

    fn uninstall(&self, session: &Session, schema: &str) -> Result<()> {
        // Cascades to every per-table truncate trigger.
        session.execute(&format!(
            "drop function if exists {}() cascade",
            qualified(schema, TRUNCATE_FUNCTION)
        ))?;

        if Self::event_trigger_uses(session, schema)? {
            info!(
                schema,
                "drop event trigger is shared by all schemas and stays; remove it with teardown-global"
            );
        } else {
            session.execute(&format!(
                "drop function if exists {}()",
                qualified(schema, DROP_FUNCTION)
            ))?;
        }
        Ok(())
    }

    fn uninstall_global(&self, session: &Session) -> Result<()> {
        session.execute(&format!(
            "drop event trigger if exists {}",
            quote_ident(DROP_EVENT_TRIGGER)
        ))?;

        let schemas = session
            .execute(&format!(
                "select pn.nspname
                 from pg_catalog.pg_proc pp
                   join pg_catalog.pg_namespace pn on (pp.pronamespace = pn.oid)
                 where pp.proname = {}",
                quote_literal(DROP_FUNCTION)
            ))?
            .first_column_text();
        for schema in schemas {
            session.execute(&format!(
                "drop function if exists {}()",
                qualified(&schema, DROP_FUNCTION)
            ))?;
        }
        info!("drop event trigger removed");
        Ok(())
    }

    fn track_relation(&self, session: &Session, schema: &str, object: &str) -> Result<()> {
        create_rules(session, schema, object)?;
        session.execute(&format!(
            "create trigger {} after truncate on {} for each statement \
             execute procedure {}()",
            quote_ident(&format!("{TRUNCATE_FUNCTION}_{object}")),
            qualified(schema, object),
            qualified(schema, TRUNCATE_FUNCTION),
        ))?;
        Ok(())
    }

    fn record_truncate(&self, _session: &Session, _schema: &str, _object: &str) -> Result<()> {
        Ok(())
    }

    fn record_drop(&self, _session: &Session, _schema: &str, _object: &str) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn tracker(session: &Session, schema: &str) -> String {
    qualified(schema, session.tracking_relation())
}

pub(crate) fn qualified(schema: &str, object: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(object))
}

pub(crate) fn relation_exists(
    session: &Session,
    schema: &str,
    object: &str,
    table_type: &str,
) -> Result<bool> {
    let n = get_single_int(&session.execute(&format!(
        "select count(*) from information_schema.tables \
         where table_schema = {} and table_name = {} and table_type = {}",
        quote_literal(schema),
        quote_literal(object),
        quote_literal(table_type),
    ))?)?;
    Ok(n.unwrap_or(0) > 0)
}

fn function_exists(session: &Session, schema: &str, function: &str) -> Result<bool> {
    let n = get_single_int(&session.execute(&format!(
        "select count(*)
         from pg_catalog.pg_proc pp
           join pg_catalog.pg_namespace pn on (pp.pronamespace = pn.oid)
         where pp.proname = {} and pn.nspname = {}",
        quote_literal(function),
        quote_literal(schema),
    ))?)?;
    Ok(n.unwrap_or(0) > 0)
}

/// One rule per row-level operation, each replacing the relation's tracked
/// row as a side effect of the statement.
pub(crate) fn create_rules(session: &Session, schema: &str, object: &str) -> Result<()> {
    let tracker = tracker(session, schema);
    for op in Operation::ROW_LEVEL {
        session.execute(&format!(
            "create or replace rule {rule} as on {op} to {table} do also (
               delete from {tracker}
                 where relation_name = {name} and relation_type = {kind};
               insert into {tracker}
                 values ({name}, {kind}, {operation}, clock_timestamp());
             )",
            rule = quote_ident(&format!("_datatask_{op}")),
            table = qualified(schema, object),
            name = quote_literal(object),
            kind = quote_literal(VOCABULARY.table),
            operation = quote_literal(VOCABULARY.operation(op)),
        ))?;
    }
    Ok(())
}

fn upsert(session: &Session, schema: &str, object: &str, op: Operation) -> Result<()> {
    delete_row(session, schema, object)?;
    session.execute(&format!(
        "insert into {} values ({}, {}, {}, clock_timestamp())",
        tracker(session, schema),
        quote_literal(object),
        quote_literal(VOCABULARY.table),
        quote_literal(VOCABULARY.operation(op)),
    ))?;
    Ok(())
}

pub(crate) fn delete_row(session: &Session, schema: &str, object: &str) -> Result<()> {
    session.execute(&format!(
        "delete from {} where relation_name = {} and relation_type = {}",
        tracker(session, schema),
        quote_literal(object),
        quote_literal(VOCABULARY.table),
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{ScriptedClient, StatementLog};
    use crate::db::TRACKING_RELATION;
    use crate::sql::ResultSet;

    fn session(
        responder: impl FnMut(&str) -> Result<ResultSet> + Send + 'static,
    ) -> (Session, StatementLog) {
        let client = ScriptedClient::new(responder);
        let log = client.log();
        (Session::new(client.shared(), TRACKING_RELATION), log)
    }

    #[test]
    fn test_rules_use_statement_clock() {
        let (s, log) = session(|_| Ok(ResultSet::empty()));
        create_rules(&s, "public", "t1").unwrap();

        assert_eq!(log.count("create or replace rule"), 3);
        assert!(log.contains("rule _datatask_insert as on insert to public.t1 do also"));
        assert_eq!(log.count("clock_timestamp()"), 3);
        assert!(log.contains("insert into public.last_operations values ('t1', 'BASE TABLE', 'UPDATE'"));
    }

    #[test]
    fn test_rule_recorder_records_ddl() {
        let (s, log) = session(|_| Ok(ResultSet::empty()));
        RuleRecorder.record_create(&s, "public", "t1").unwrap();
        RuleRecorder.record_truncate(&s, "public", "t1").unwrap();
        RuleRecorder.record_drop(&s, "public", "t1").unwrap();

        let statements = log.statements();
        assert!(statements[0].starts_with("delete from public.last_operations"));
        assert!(statements[1].contains("'CREATE', clock_timestamp()"));
        assert!(statements[2].starts_with("update public.last_operations set operation = 'TRUNCATE'"));
        assert!(statements[3].starts_with("delete from public.last_operations"));
    }

    #[test]
    fn test_trigger_recorder_leaves_ddl_to_database() {
        let (s, log) = session(|_| Ok(ResultSet::empty()));
        TriggerRecorder.record_truncate(&s, "public", "t1").unwrap();
        TriggerRecorder.record_drop(&s, "public", "t1").unwrap();
        assert!(log.statements().is_empty());

        TriggerRecorder.track_relation(&s, "public", "t1").unwrap();
        assert!(log.contains(
            "create trigger datatask_track_truncate_t1 after truncate on public.t1 for each statement execute procedure public.datatask_track_truncate()"
        ));
    }

    #[test]
    fn test_trigger_install_replaces_event_trigger() {
        let (s, log) = session(|_| Ok(ResultSet::empty()));
        TriggerRecorder.install(&s, "s1").unwrap();

        let drop = log.position("drop event trigger if exists").unwrap();
        let create = log.position("create event trigger datatask_track_drop_trigger").unwrap();
        assert!(drop < create);
        assert!(log.contains("execute procedure s1.datatask_track_drop()"));
        assert!(log.contains("create or replace function s1.datatask_track_truncate()"));
    }

    #[test]
    fn test_partial_install_is_not_installed() {
        let (s, _) = session(|sql| {
            Ok(if sql.contains("pg_event_trigger") {
                ResultSet::single(0i64)
            } else {
                ResultSet::single(1i64)
            })
        });
        assert!(!TriggerRecorder.is_installed(&s, "public").unwrap());
    }

    #[test]
    fn test_uninstall_keeps_shared_event_trigger() {
        let (s, log) = session(|sql| {
            Ok(if sql.contains("pg_event_trigger pe") {
                ResultSet::single(1i64)
            } else {
                ResultSet::empty()
            })
        });
        TriggerRecorder.uninstall(&s, "public").unwrap();

        assert!(log.contains("drop function if exists public.datatask_track_truncate() cascade"));
        assert!(!log.contains("drop function if exists public.datatask_track_drop()"));
        assert!(!log.contains("drop event trigger"));
    }

    #[test]
    fn test_uninstall_global() {
        let (s, log) = session(|sql| {
            Ok(if sql.starts_with("select pn.nspname") {
                ResultSet::column(["public", "s2"])
            } else {
                ResultSet::empty()
            })
        });
        TriggerRecorder.uninstall_global(&s).unwrap();

        assert!(log.contains("drop event trigger if exists datatask_track_drop_trigger"));
        assert!(log.contains("drop function if exists public.datatask_track_drop()"));
        assert!(log.contains("drop function if exists s2.datatask_track_drop()"));
    }
}
