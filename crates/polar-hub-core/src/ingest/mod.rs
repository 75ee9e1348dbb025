//! Ingest pipeline: real-time beats (D), batch deduplication (E), and the
//! thin posture/status pass-throughs that share the `polar_raw` store.

pub mod batch;
pub mod realtime;

use crate::model::{FieldValue, Point, measurement};

/// Status events persisted to `polar_relay_status`; everything else is
/// log-only at the HTTP layer.
pub const PERSISTED_STATUS_EVENTS: &[&str] = &[
    "ble.connected",
    "ble.disconnected",
    "ble.pmd_locked",
    "session.recording",
    "session.download_complete",
    "session.error",
    "stream.hr_interrupted",
    "stream.hr_recovered",
    "upload.server_online",
    "upload.server_offline",
];

pub fn is_persisted_status_event(event: &str) -> bool {
    PERSISTED_STATUS_EVENTS.contains(&event)
}

/// `ble.disconnected` is the only status event with a pipeline side effect:
/// it clears the device's in-memory state.
pub fn clears_device_state(event: &str) -> bool {
    event == "ble.disconnected"
}

pub struct PostureEvent {
    pub timestamp: i64,
    pub from_posture: String,
    pub to_posture: String,
    pub source: Option<String>,
    pub from_duration_seconds: Option<f64>,
    pub confidence: Option<f64>,
}

/// Builds the `polar_posture` point for a posture transition. A pure
/// pass-through: no device state is touched, only the caller-supplied
/// `lastPosture` bookkeeping (see `RealtimeBeatRequest::posture`) reflects
/// posture into device state.
pub fn posture_point(event: PostureEvent) -> Point {
    let mut point = Point::new(measurement::POSTURE, event.timestamp)
        .with_tag("from_posture", event.from_posture)
        .with_tag("to_posture", event.to_posture);
    if let Some(source) = event.source {
        point = point.with_tag("source", source);
    }
    if let Some(v) = event.from_duration_seconds {
        point = point.with_field("from_duration_seconds", v);
    }
    if let Some(v) = event.confidence {
        point = point.with_field("confidence", v);
    }
    point
}

pub struct StatusEvent {
    pub timestamp: i64,
    pub category: String,
    pub event: String,
    pub source: Option<String>,
    pub device: Option<String>,
    pub fields: Vec<(String, FieldValue)>,
}

/// Builds the `polar_relay_status` point for an allow-listed status event,
/// or `None` if this event isn't persisted (log-only).
pub fn status_point(status: StatusEvent) -> Option<Point> {
    if !is_persisted_status_event(&status.event) {
        return None;
    }
    let mut point = Point::new(measurement::RELAY_STATUS, status.timestamp)
        .with_tag("category", status.category)
        .with_tag("event", status.event);
    if let Some(source) = status.source {
        point = point.with_tag("source", source);
    }
    if let Some(device) = status.device {
        point = point.with_tag("device", device);
    }
    if status.fields.is_empty() {
        point = point.with_field("value", 1i64);
    } else {
        for (k, v) in status.fields {
            point = point.with_field(k, v);
        }
    }
    Some(point)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_event_is_not_persisted() {
        let status = StatusEvent {
            timestamp: 1000,
            category: "cat".into(),
            event: "something.unlisted".into(),
            source: None,
            device: None,
            fields: vec![],
        };
        assert!(status_point(status).is_none());
    }

    #[test]
    fn listed_status_event_defaults_to_value_field() {
        let status = StatusEvent {
            timestamp: 1000,
            category: "ble".into(),
            event: "ble.connected".into(),
            source: None,
            device: Some("d1".into()),
            fields: vec![],
        };
        let point = status_point(status).unwrap();
        assert_eq!(point.field_f64("value"), Some(1.0));
    }

    #[test]
    fn disconnected_clears_device_state() {
        assert!(clears_device_state("ble.disconnected"));
        assert!(!clears_device_state("ble.connected"));
    }
}
