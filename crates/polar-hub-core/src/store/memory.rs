//! In-memory reference implementation of the time-series store contract.
//!
//! Not a mock: this is the store every unit test in the workspace runs
//! against, and it implements the exact merge-by-field idempotency rule
//! the external driver also has to honor.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::error::StoreError;
use crate::model::{FieldValue, Point};

type TagKey = Vec<(String, String)>;
type SeriesKey = (String, TagKey);
type FieldMap = BTreeMap<String, FieldValue>;

#[derive(Default)]
pub struct MemoryStore {
    series: Mutex<HashMap<SeriesKey, BTreeMap<i64, FieldMap>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key_for(point: &Point) -> SeriesKey {
        let tags: TagKey = point
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        (point.measurement.clone(), tags)
    }

    pub fn write_points(&self, points: Vec<Point>) -> Result<(), StoreError> {
        let mut series = self.series.lock().unwrap();
        for point in points {
            let key = Self::key_for(&point);
            let by_ts = series.entry(key).or_default();
            let fields = by_ts.entry(point.timestamp).or_default();
            for (k, v) in point.fields {
                fields.insert(k, v);
            }
        }
        Ok(())
    }

    pub fn query_range(
        &self,
        measurement: &str,
        device: &str,
        start: i64,
        end: i64,
    ) -> Vec<Point> {
        let series = self.series.lock().unwrap();
        let mut out = Vec::new();
        for ((m, tags), by_ts) in series.iter() {
            if m != measurement {
                continue;
            }
            if !tags.iter().any(|(k, v)| k == "device" && v == device) {
                continue;
            }
            for (&ts, fields) in by_ts.range(start..=end) {
                out.push(Point {
                    measurement: m.clone(),
                    tags: tags.iter().cloned().collect(),
                    timestamp: ts,
                    fields: fields.clone(),
                });
            }
        }
        out.sort_by_key(|p| p.timestamp);
        out
    }

    pub fn latest_clean_timestamp(&self, device: &str) -> Option<i64> {
        let series = self.series.lock().unwrap();
        let mut best: Option<i64> = None;
        for ((m, tags), by_ts) in series.iter() {
            if m != crate::model::measurement::RAW {
                continue;
            }
            if !tags.iter().any(|(k, v)| k == "device" && v == device) {
                continue;
            }
            for (&ts, fields) in by_ts.iter() {
                if fields.contains_key("rr_clean") && best.is_none_or(|b| ts > b) {
                    best = Some(ts);
                }
            }
        }
        best
    }

    /// Total point count across every series, mostly useful in tests that
    /// assert idempotence (P3).
    pub fn point_count(&self) -> usize {
        self.series.lock().unwrap().values().map(|m| m.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_point(device: &str, ts: i64, rr: f64) -> Point {
        Point::new(crate::model::measurement::RAW, ts)
            .with_tag("device", device)
            .with_field("rr_interval", rr)
    }

    #[test]
    fn write_then_read_round_trips() {
        let store = MemoryStore::new();
        store
            .write_points(vec![raw_point("d1", 1000, 600.0)])
            .unwrap();
        let points = store.query_range(crate::model::measurement::RAW, "d1", 0, 2000);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].field_f64("rr_interval"), Some(600.0));
    }

    #[test]
    fn repeated_identity_merges_fields() {
        let store = MemoryStore::new();
        store
            .write_points(vec![raw_point("d1", 1000, 600.0)])
            .unwrap();
        store
            .write_points(vec![
                Point::new(crate::model::measurement::RAW, 1000)
                    .with_tag("device", "d1")
                    .with_field("rr_clean", 600.0)
                    .with_field("artifact_type", "none"),
            ])
            .unwrap();

        assert_eq!(store.point_count(), 1);
        let points = store.query_range(crate::model::measurement::RAW, "d1", 0, 2000);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].field_f64("rr_interval"), Some(600.0));
        assert_eq!(points[0].field_f64("rr_clean"), Some(600.0));
        assert_eq!(points[0].field_str("artifact_type"), Some("none"));
    }

    #[test]
    fn latest_clean_timestamp_ignores_unclassified_points() {
        let store = MemoryStore::new();
        store
            .write_points(vec![raw_point("d1", 1000, 600.0), raw_point("d1", 2000, 610.0)])
            .unwrap();
        assert_eq!(store.latest_clean_timestamp("d1"), None);

        store
            .write_points(vec![
                Point::new(crate::model::measurement::RAW, 1000)
                    .with_tag("device", "d1")
                    .with_field("rr_clean", 600.0),
            ])
            .unwrap();
        assert_eq!(store.latest_clean_timestamp("d1"), Some(1000));
    }

    #[test]
    fn devices_are_isolated() {
        let store = MemoryStore::new();
        store
            .write_points(vec![raw_point("d1", 1000, 600.0), raw_point("d2", 1000, 700.0)])
            .unwrap();
        assert_eq!(
            store
                .query_range(crate::model::measurement::RAW, "d1", 0, 2000)
                .len(),
            1
        );
        assert_eq!(
            store
                .query_range(crate::model::measurement::RAW, "d2", 0, 2000)
                .len(),
            1
        );
    }
}
