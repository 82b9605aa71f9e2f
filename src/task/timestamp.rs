//! Task timestamps.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// When a task's output was last produced.
///
/// `Early` stands for "never built" and sorts before every real time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Timestamp {
    Early,
    At(DateTime<Utc>),
}

impl Timestamp {
    pub fn is_early(&self) -> bool {
        matches!(self, Timestamp::Early)
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::Early => None,
            Timestamp::At(t) => Some(*t),
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(t: DateTime<Utc>) -> Self {
        Timestamp::At(t)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Early => f.write_str("never"),
            Timestamp::At(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

/// Whether any real prerequisite time is later than `own`. `Early`
/// prerequisites take no part in the comparison.
pub fn out_of_date(own: Timestamp, prerequisites: &[Timestamp]) -> bool {
    prerequisites
        .iter()
        .filter(|t| !t.is_early())
        .max()
        .is_some_and(|latest| *latest > own)
}
