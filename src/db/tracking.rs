//! The tracking relation: its columns and each backend's literal spelling of
//! relation kinds and operations.

use crate::error::{Error, Result};
use crate::sql::result::{parse_time, Value};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Kind of relation a tracked row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Table,
    View,
}

/// A recorded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Insert,
    Update,
    Delete,
    Truncate,
    Drop,
}

impl Operation {
    /// Operations the relational backends can observe with row-level rules or triggers.
    pub const ROW_LEVEL: [Operation; 3] = [Operation::Insert, Operation::Update, Operation::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Truncate => "truncate",
            Operation::Drop => "drop",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-specific literals stored in the tracking relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vocabulary {
    pub table: &'static str,
    pub view: &'static str,
    pub create: &'static str,
    pub insert: &'static str,
    pub update: &'static str,
    pub delete: &'static str,
    pub truncate: &'static str,
    pub drop: &'static str,
    /// SQL type of the `time` column.
    pub time_type: &'static str,
}

impl Vocabulary {
    pub const LOWERCASE: Vocabulary = Vocabulary {
        table: "table",
        view: "view",
        create: "create",
        insert: "insert",
        update: "update",
        delete: "delete",
        truncate: "truncate",
        drop: "drop",
        time_type: "timestamp",
    };

    /// Upper case to match the system catalogs, which also call tables `BASE TABLE`.
    pub const POSTGRES: Vocabulary = Vocabulary {
        table: "BASE TABLE",
        view: "VIEW",
        create: "CREATE",
        insert: "INSERT",
        update: "UPDATE",
        delete: "DELETE",
        truncate: "TRUNCATE",
        drop: "DROP",
        time_type: "timestamp with time zone",
    };

    pub fn relation_kind(&self, kind: RelationKind) -> &'static str {
        match kind {
            RelationKind::Table => self.table,
            RelationKind::View => self.view,
        }
    }

    pub fn operation(&self, op: Operation) -> &'static str {
        match op {
            Operation::Create => self.create,
            Operation::Insert => self.insert,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
            Operation::Truncate => self.truncate,
            Operation::Drop => self.drop,
        }
    }

    pub fn parse_relation_kind(&self, raw: &str) -> Option<RelationKind> {
        [RelationKind::Table, RelationKind::View]
            .into_iter()
            .find(|k| self.relation_kind(*k) == raw)
    }

    pub fn parse_operation(&self, raw: &str) -> Option<Operation> {
        [
            Operation::Create,
            Operation::Insert,
            Operation::Update,
            Operation::Delete,
            Operation::Truncate,
            Operation::Drop,
        ]
        .into_iter()
        .find(|op| self.operation(*op) == raw)
    }

    /// Column list for creating the tracking relation.
    pub fn column_definitions(&self) -> String {
        format!(
            "(relation_name text, relation_type text, operation text, time {})",
            self.time_type
        )
    }
}

/// One row of the tracking relation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedOperation {
    pub relation_name: String,
    pub relation_kind: RelationKind,
    pub operation: Operation,
    pub time: DateTime<Utc>,
}

impl TrackedOperation {
    /// Decode a `(relation_name, relation_type, operation, time)` row.
    pub fn from_row(row: &[Value], vocabulary: &Vocabulary) -> Result<Self> {
        if row.len() != 4 {
            return Err(Error::Shape("tracked operation row"));
        }

        let kind_raw = text_at(row, 1, "relation kind")?;
        let op_raw = text_at(row, 2, "operation")?;
        Ok(Self {
            relation_name: text_at(row, 0, "relation name")?.to_string(),
            relation_kind: vocabulary
                .parse_relation_kind(kind_raw)
                .ok_or_else(|| Error::conversion(kind_raw, "relation kind"))?,
            operation: vocabulary
                .parse_operation(op_raw)
                .ok_or_else(|| Error::conversion(op_raw, "operation"))?,
            time: parse_time(text_at(row, 3, "timestamp")?)?,
        })
    }
}

fn text_at<'a>(row: &'a [Value], i: usize, what: &'static str) -> Result<&'a str> {
    row.get(i)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::conversion(format!("{:?}", row.get(i)), what))
}
