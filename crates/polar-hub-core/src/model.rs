//! Wire/storage types shared by the ingest pipeline, the classifier, and the store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type DeviceId = String;

/// Which ingest path wrote a raw beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeatPath {
    Realtime,
    Batch,
}

/// Outcome of classifying one RR interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    None,
    Ectopic,
    Missed,
    MissedInserted,
    Extra,
    ExtraAbsorbed,
    Longshort,
}

impl ArtifactType {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactType::None => "none",
            ArtifactType::Ectopic => "ectopic",
            ArtifactType::Missed => "missed",
            ArtifactType::MissedInserted => "missed_inserted",
            ArtifactType::Extra => "extra",
            ArtifactType::ExtraAbsorbed => "extra_absorbed",
            ArtifactType::Longshort => "longshort",
        }
    }
}

/// A scalar value for a store field. Mirrors InfluxDB line-protocol field typing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Str(String),
    Bool(bool),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// Measurement names, as laid out in the external time-series schema.
pub mod measurement {
    pub const RAW: &str = "polar_raw";
    pub const REALTIME: &str = "polar_realtime";
    pub const HRV_SUMMARY: &str = "polar_hrv_summary";
    pub const POSTURE: &str = "polar_posture";
    pub const RELAY_STATUS: &str = "polar_relay_status";
}

/// A point identity is `(measurement, tags, timestamp)`; writing the same identity
/// twice merges fields rather than replacing the point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub timestamp: i64,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Point {
    pub fn new(measurement: impl Into<String>, timestamp: i64) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            timestamp,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field_f64(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(FieldValue::as_f64)
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(FieldValue::as_str)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<BeatPath> for FieldValue {
    fn from(v: BeatPath) -> Self {
        FieldValue::Str(match v {
            BeatPath::Realtime => "realtime".to_string(),
            BeatPath::Batch => "batch".to_string(),
        })
    }
}

impl From<ArtifactType> for FieldValue {
    fn from(v: ArtifactType) -> Self {
        FieldValue::Str(v.as_str().to_string())
    }
}

/// Raw beat as read back from the store: one `(device, timestamp)` row of `polar_raw`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBeat {
    pub device: DeviceId,
    pub timestamp: i64,
    pub rr_interval: Option<f64>,
    pub heart_rate: Option<f64>,
    pub source: Option<String>,
    pub path: Option<BeatPath>,
    pub rr_clean: Option<f64>,
    pub hr_clean: Option<f64>,
    pub artifact_type: Option<ArtifactType>,
}

impl RawBeat {
    /// Timestamps with no positive `rr_interval` are synthetic inserts or
    /// absorbed-beat sentinels and must be filtered out of classifier context.
    pub fn has_positive_rr(&self) -> bool {
        self.rr_interval.is_some_and(|rr| rr > 0.0)
    }

    pub fn is_classified(&self) -> bool {
        self.rr_clean.is_some()
    }

    pub fn from_point(p: &Point) -> Option<Self> {
        if p.measurement != measurement::RAW {
            return None;
        }
        let device = p.tags.get("device")?.clone();
        let artifact_type = p.field_str("artifact_type").and_then(|s| match s {
            "none" => Some(ArtifactType::None),
            "ectopic" => Some(ArtifactType::Ectopic),
            "missed" => Some(ArtifactType::Missed),
            "missed_inserted" => Some(ArtifactType::MissedInserted),
            "extra" => Some(ArtifactType::Extra),
            "extra_absorbed" => Some(ArtifactType::ExtraAbsorbed),
            "longshort" => Some(ArtifactType::Longshort),
            _ => None,
        });
        let path = p.field_str("path").and_then(|s| match s {
            "realtime" => Some(BeatPath::Realtime),
            "batch" => Some(BeatPath::Batch),
            _ => None,
        });
        Some(RawBeat {
            device,
            timestamp: p.timestamp,
            rr_interval: p.field_f64("rr_interval"),
            heart_rate: p.field_f64("heart_rate"),
            source: p.field_str("source").map(|s| s.to_string()),
            path,
            rr_clean: p.field_f64("rr_clean"),
            hr_clean: p.field_f64("hr_clean"),
            artifact_type,
        })
    }
}

/// RMSSD / SDNN / pNN50, computed over a cleaned RR sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrvMetrics {
    pub rmssd: f64,
    pub sdnn: f64,
    pub pnn50: f64,
}

/// `60000 / rr`, rounded to 0.01 bpm. `rr <= 0` has no defined heart rate.
pub fn hr_from_rr(rr: f64) -> Option<f64> {
    if rr > 0.0 {
        Some((60_000.0 / rr * 100.0).round() / 100.0)
    } else {
        None
    }
}
