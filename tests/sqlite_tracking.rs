//! Change tracking against a SQLite database file.

use chrono::{Duration, Utc};
use datatask::adapter::{Adapter, SqliteAdapter};
use datatask::db::{Operation, Session, SharedClient, SqliteClient, TRACKING_RELATION};
use datatask::Error;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use tempfile::TempDir;

fn open(path: &Path) -> (SqliteAdapter, Session) {
    let client: SharedClient = Arc::new(Mutex::new(SqliteClient::new(path)));
    let session = Session::new(Arc::clone(&client), TRACKING_RELATION);
    (SqliteAdapter::new(client, TRACKING_RELATION), session)
}

fn tick() {
    sleep(std::time::Duration::from_millis(5));
}

#[test]
fn test_create_records_time() {
    let temp = TempDir::new().unwrap();
    let (adapter, _) = open(&temp.path().join("db.sqlite3"));

    // Tracked times have millisecond precision.
    let before = Utc::now() - Duration::milliseconds(1);
    adapter.create_data("t1", None, "(n integer)", true).unwrap();

    assert!(adapter.data_exists("t1", None).unwrap());
    let mtime = adapter.data_mtime("t1").unwrap().unwrap();
    assert!(mtime >= before);
}

#[test]
fn test_insert_keeps_one_current_row() {
    let temp = TempDir::new().unwrap();
    let (adapter, session) = open(&temp.path().join("db.sqlite3"));

    adapter.create_data("t1", None, "(n integer)", true).unwrap();
    let created = adapter.tracked_operations("t1").unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].operation, Operation::Create);

    tick();
    session.execute("insert into t1 values (1)").unwrap();

    let ops = adapter.tracked_operations("t1").unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].operation, Operation::Insert);
    assert!(ops[0].time > created[0].time);
}

#[test]
fn test_every_mutation_advances_mtime() {
    let temp = TempDir::new().unwrap();
    let (adapter, session) = open(&temp.path().join("db.sqlite3"));
    adapter.create_data("t1", None, "(n integer)", true).unwrap();

    let mut last = adapter.data_mtime("t1").unwrap().unwrap();
    for sql in [
        "insert into t1 values (1)",
        "update t1 set n = 2",
        "delete from t1",
    ] {
        tick();
        session.execute(sql).unwrap();
        let now = adapter.data_mtime("t1").unwrap().unwrap();
        assert!(now > last, "{sql} did not advance mtime");
        last = now;
    }

    tick();
    adapter.truncate_data("t1").unwrap();
    assert!(adapter.data_mtime("t1").unwrap().unwrap() > last);
}

#[test]
fn test_drop_removes_tracking_row() {
    let temp = TempDir::new().unwrap();
    let (adapter, session) = open(&temp.path().join("db.sqlite3"));
    adapter.create_data("t1", None, "(n integer)", true).unwrap();
    adapter.drop_data("t1").unwrap();

    assert!(!adapter.data_exists("t1", None).unwrap());
    assert!(adapter.tracked_operations("t1").unwrap().is_empty());
    let count = session
        .execute("select count(*) from last_operations where relation_name = 't1'")
        .unwrap();
    assert_eq!(count.rows()[0][0].to_string(), "0");
}

#[test]
fn test_setup_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let (adapter, _) = open(&temp.path().join("db.sqlite3"));

    adapter.set_up_tracking(None, false).unwrap();
    adapter.create_data("t1", None, "(n integer)", true).unwrap();
    adapter.set_up_tracking(None, false).unwrap();

    assert!(adapter.is_tracking(None).unwrap());
    assert!(adapter.data_mtime("t1").unwrap().is_some());
}

#[test]
fn test_tracking_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("db.sqlite3");
    let mtime = {
        let (adapter, _) = open(&path);
        adapter.create_data("t1", None, "(n integer)", true).unwrap();
        adapter.data_mtime("t1").unwrap()
    };

    let (adapter, session) = open(&path);
    assert!(adapter.is_tracking(None).unwrap());
    assert_eq!(adapter.data_mtime("t1").unwrap(), mtime);

    tick();
    session.execute("insert into t1 values (7)").unwrap();
    assert!(adapter.data_mtime("t1").unwrap() > mtime);
}

#[test]
fn test_attached_schemas_are_isolated() {
    let temp = TempDir::new().unwrap();
    let (adapter, session) = open(&temp.path().join("main.sqlite3"));
    let other = temp.path().join("other.sqlite3");
    session
        .execute(&format!("attach database '{}' as other", other.display()))
        .unwrap();

    adapter.create_data("main.t1", None, "(n integer)", true).unwrap();
    adapter.create_data("other.t1", None, "(n integer)", true).unwrap();
    let main_before = adapter.tracked_operations("main.t1").unwrap();

    tick();
    session.execute("insert into other.t1 values (1)").unwrap();

    assert_eq!(adapter.tracked_operations("main.t1").unwrap(), main_before);
    let other_ops = adapter.tracked_operations("other.t1").unwrap();
    assert_eq!(other_ops[0].operation, Operation::Insert);

    adapter.drop_data("other.t1").unwrap();
    assert_eq!(adapter.tracked_operations("main.t1").unwrap(), main_before);
}

#[test]
fn test_mtime_requires_setup() {
    let temp = TempDir::new().unwrap();
    let (adapter, _) = open(&temp.path().join("db.sqlite3"));
    adapter.create_data("t1", None, "(n integer)", false).unwrap();

    assert!(matches!(
        adapter.data_mtime("t1"),
        Err(Error::TrackingNotSetUp { .. })
    ));
    assert!(!adapter.is_tracking(None).unwrap());
}
