//! Freshness of a task whose output is a data collection.

use super::timestamp::{out_of_date, Timestamp};
use crate::adapter::Data;
use crate::error::{Error, Result};
use tracing::debug;

/// A task that builds `data`. Needed when the data is missing or older than
/// any of its prerequisites.
#[derive(Debug, Clone)]
pub struct DataTask {
    data: Data,
}

impl DataTask {
    pub fn new(data: Data) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    /// `Early` when the data does not exist, else its tracked modification time.
    pub fn timestamp(&self) -> Result<Timestamp> {
        if !self.data.exists()? {
            return Ok(Timestamp::Early);
        }
        self.data
            .mtime()?
            .map(Timestamp::At)
            .ok_or_else(|| Error::MissingTimestamp(self.data.name().to_string()))
    }

    pub fn needed(&self, prerequisites: &[Timestamp]) -> Result<bool> {
        if !self.data.exists()? {
            debug!(data = %self.data, "needed: does not exist");
            return Ok(true);
        }
        let own = self.timestamp()?;
        let stale = out_of_date(own, prerequisites);
        debug!(data = %self.data, %own, stale, "freshness checked");
        Ok(stale)
    }
}
