//! Greenplum keeps its own log of create and truncate operations in
//! `pg_stat_operations`. The tracking relation here is a view that merges that
//! log with the row-change log written by rules, keeping the latest entry per
//! relation.

use super::recorder::{create_rules, qualified, relation_exists, tracker, Recorder, VOCABULARY};
use crate::config::BackendKind;
use crate::db::Session;
use crate::error::Result;
use crate::sql::quote_literal;

/// Backing table for operations the rules record.
const LOG_TABLE: &str = "operations";

/// `pg_stat_operations` with its relation kinds spelled like ours.
const CATALOG_VIEW: &str = "fixed_pg_stat_operations";

pub struct CatalogRecorder;

impl CatalogRecorder {
    fn log_table(schema: &str) -> String {
        qualified(schema, LOG_TABLE)
    }
}

impl Recorder for CatalogRecorder {
    fn kind(&self) -> BackendKind {
        BackendKind::Greenplum
    }

    fn create_store(&self, session: &Session, schema: &str) -> Result<()> {
        let table = quote_literal(VOCABULARY.table);
        let log = Self::log_table(schema);
        let catalog = qualified(schema, CATALOG_VIEW);
        let tracker = tracker(session, schema);

        session.execute(&format!(
            "create table if not exists {log} {}",
            VOCABULARY.column_definitions()
        ))?;

        session.execute(&format!(
            "create or replace view {catalog} as
             select
               pso.classname,
               pso.objname,
               pso.objid,
               pso.schemaname,
               pso.usestatus,
               pso.usename,
               pso.actionname,
               case
                 when pso.actionname = 'TRUNCATE' then {table}
                 when pso.subtype = 'TABLE' then {table}
                 else pso.subtype
               end as subtype,
               pso.statime
             from pg_stat_operations pso"
        ))?;

        session.execute(&format!(
            "create or replace view {tracker} as
             select relation_name, relation_type, operation, time
             from (
               select
                 a.*,
                 rank() over (partition by relation_name, relation_type order by time desc) as latest
               from (
                 select
                   pso.objname as relation_name,
                   pso.subtype as relation_type,
                   pso.actionname as operation,
                   pso.statime as time
                 from {catalog} pso
                 where pso.schemaname = {schema_literal}
                   and pso.actionname not in ('ANALYZE', 'VACUUM')

                 union all

                 select ops.relation_name, ops.relation_type, ops.operation, ops.time
                 from {log} ops
                   join {catalog} pso on (
                     ops.relation_name = pso.objname and
                     ops.relation_type = pso.subtype and
                     pso.schemaname = {schema_literal} and
                     pso.actionname = 'CREATE'
                   )
               ) a
             ) b
             where latest = 1",
            schema_literal = quote_literal(schema),
        ))?;

        // Writes aimed at the view land in the log table.
        session.execute(&format!(
            "create or replace rule delete_operation_record as on delete to {tracker}
             do instead
             delete from {log}
             where relation_name = OLD.relation_name and relation_type = OLD.relation_type"
        ))?;
        session.execute(&format!(
            "create or replace rule insert_operation_record as on insert to {tracker}
             do instead
             insert into {log}
             values (NEW.relation_name, NEW.relation_type, NEW.operation, NEW.time)"
        ))?;
        Ok(())
    }

    fn drop_store(&self, session: &Session, schema: &str) -> Result<()> {
        session.execute(&format!(
            "drop view if exists {} cascade",
            tracker(session, schema)
        ))?;
        session.execute(&format!(
            "drop view if exists {} cascade",
            qualified(schema, CATALOG_VIEW)
        ))?;
        session.execute(&format!(
            "drop table if exists {} cascade",
            Self::log_table(schema)
        ))?;
        Ok(())
    }

    /// Only the rule-written log can be cleared; the system catalog keeps its own.
    fn clear_store(&self, session: &Session, schema: &str) -> Result<()> {
        session.execute(&format!("truncate table {}", Self::log_table(schema)))?;
        Ok(())
    }

    fn store_exists(&self, session: &Session, schema: &str) -> Result<bool> {
        relation_exists(session, schema, session.tracking_relation(), VOCABULARY.view)
    }

    fn is_installed(&self, session: &Session, schema: &str) -> Result<bool> {
        Ok(relation_exists(session, schema, LOG_TABLE, VOCABULARY.table)?
            && relation_exists(session, schema, CATALOG_VIEW, VOCABULARY.view)?)
    }

    fn track_relation(&self, session: &Session, schema: &str, object: &str) -> Result<()> {
        create_rules(session, schema, object)
    }

    fn record_create(&self, _session: &Session, _schema: &str, _object: &str) -> Result<()> {
        Ok(())
    }

    fn record_truncate(&self, _session: &Session, _schema: &str, _object: &str) -> Result<()> {
        Ok(())
    }

    /// The catalog forgets dropped relations by itself; clear the rule log too.
    fn record_drop(&self, session: &Session, schema: &str, object: &str) -> Result<()> {
        session.execute(&format!(
            "delete from {} where relation_name = {}",
            Self::log_table(schema),
            quote_literal(object)
        ))?;
        Ok(())
    }
}
