//! Time-series store adapter: a typed write/query interface over the five
//! measurements, idempotent on `(measurement, tags, timestamp)`.
//!
//! The concrete driver is deliberately thin (see [`influx`]); [`memory`] is
//! a complete reference implementation of the merge-by-field contract and
//! is what every test in this workspace exercises against.

pub mod influx;
pub mod memory;

pub use influx::InfluxStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::model::Point;

/// Dispatches to whichever backend was configured at startup.
///
/// An enum rather than a `dyn Trait` + `async-trait`: the workspace has
/// exactly two backends and no plugin model, so static dispatch is simpler
/// and keeps every `.await` point visible at the call site.
pub enum Store {
    Memory(MemoryStore),
    Influx(InfluxStore),
}

impl Store {
    /// Merge-writes `points`: for each `(measurement, tags, timestamp)`
    /// identity, supplied fields overlay (not replace) whatever is stored.
    pub async fn write_points(&self, points: Vec<Point>) -> Result<(), StoreError> {
        match self {
            Store::Memory(s) => s.write_points(points),
            Store::Influx(s) => s.write_points(points).await,
        }
    }

    /// Reads every point of `measurement` tagged `device` with
    /// `start <= timestamp <= end`, ascending by timestamp.
    pub async fn query_range(
        &self,
        measurement: &str,
        device: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Point>, StoreError> {
        match self {
            Store::Memory(s) => Ok(s.query_range(measurement, device, start, end)),
            Store::Influx(s) => s.query_range(measurement, device, start, end).await,
        }
    }

    /// The latest `polar_raw` timestamp for `device` that already carries a
    /// classified `rr_clean` field, used to rebuild `lastProcessedMs` on
    /// restart.
    pub async fn latest_clean_timestamp(&self, device: &str) -> Result<Option<i64>, StoreError> {
        match self {
            Store::Memory(s) => Ok(s.latest_clean_timestamp(device)),
            Store::Influx(s) => s.latest_clean_timestamp(device).await,
        }
    }
}
