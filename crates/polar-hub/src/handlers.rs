//! HTTP handlers for the ingest, posture, status, SSE, and health routes.

use std::convert::Infallible;
use std::time::Duration;

use async_stream::stream;
use axum::Json;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use futures_core::Stream;
use polar_hub_core::error::IngestErrorKind;
use polar_hub_core::ingest::batch::{BatchBeat, BatchIngestRequest, ingest_batch};
use polar_hub_core::ingest::realtime::{RealtimeBeatRequest, ingest_realtime};
use polar_hub_core::ingest::{PostureEvent, StatusEvent, posture_point, status_point};
use polar_hub_core::model::FieldValue;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct BeatBody {
    source: Option<String>,
    device: String,
    timestamp: Option<i64>,
    #[serde(rename = "heartRate")]
    heart_rate: Option<f64>,
    #[serde(rename = "rrIntervals")]
    rr_intervals: Vec<f64>,
    posture: Option<String>,
}

pub(crate) async fn handle_beats(
    state: AppState,
    Json(body): Json<BeatBody>,
) -> (StatusCode, Json<Value>) {
    let (shared, _tx) = state.0;
    let outcome = ingest_realtime(
        &shared.devices,
        &shared.store,
        RealtimeBeatRequest {
            device: body.device,
            timestamp: body.timestamp,
            heart_rate: body.heart_rate,
            rr_intervals: body.rr_intervals,
            source: body.source,
            posture: body.posture,
        },
    )
    .await;

    match outcome {
        Ok(o) => (
            StatusCode::OK,
            Json(json!({"ok": true, "received": o.received})),
        ),
        Err(e) => (
            status_for_ingest_error(e.kind),
            Json(json!({"ok": false, "error": e.reason})),
        ),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct BatchBeatBody {
    timestamp: i64,
    #[serde(rename = "heartRate")]
    heart_rate: Option<f64>,
    #[serde(rename = "rrIntervals")]
    rr_intervals: Option<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BatchBody {
    source: Option<String>,
    device: String,
    beats: Vec<BatchBeatBody>,
}

pub(crate) async fn handle_beats_batch(
    state: AppState,
    Json(body): Json<BatchBody>,
) -> (StatusCode, Json<Value>) {
    let (shared, _tx) = state.0;
    let outcome = ingest_batch(
        &shared.devices,
        &shared.store,
        BatchIngestRequest {
            device: body.device,
            source: body.source,
            beats: body
                .beats
                .into_iter()
                .map(|b| BatchBeat {
                    timestamp: b.timestamp,
                    heart_rate: b.heart_rate,
                    rr_intervals: b.rr_intervals,
                })
                .collect(),
        },
    )
    .await;

    match outcome {
        Ok(o) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "received": o.received,
                "new": o.new,
                "duplicates": o.duplicates,
            })),
        ),
        Err(e) => (
            status_for_ingest_error(e.kind),
            Json(json!({"ok": false, "error": e.reason})),
        ),
    }
}

/// Maps an `IngestError`'s taxonomy bucket to the HTTP status the client sees.
fn status_for_ingest_error(kind: IngestErrorKind) -> StatusCode {
    match kind {
        IngestErrorKind::Malformed => StatusCode::BAD_REQUEST,
        IngestErrorKind::Store => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PostureBody {
    source: Option<String>,
    #[serde(rename = "fromPosture")]
    from_posture: String,
    #[serde(rename = "toPosture")]
    to_posture: String,
    #[serde(rename = "fromDurationSeconds")]
    from_duration_seconds: Option<f64>,
    confidence: Option<f64>,
}

pub(crate) async fn handle_posture(state: AppState, Json(body): Json<PostureBody>) -> Json<Value> {
    let (shared, _tx) = state.0;
    let point = posture_point(PostureEvent {
        timestamp: polar_hub_core::now_ms(),
        from_posture: body.from_posture,
        to_posture: body.to_posture,
        source: body.source,
        from_duration_seconds: body.from_duration_seconds,
        confidence: body.confidence,
    });
    if let Err(e) = shared.store.write_points(vec![point]).await {
        tracing::warn!(error = %e, "posture write failed");
    }
    Json(json!({"ok": true}))
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusBody {
    source: Option<String>,
    device: Option<String>,
    category: String,
    event: String,
    #[serde(default)]
    fields: std::collections::BTreeMap<String, Value>,
}

pub(crate) async fn handle_status(state: AppState, Json(body): Json<StatusBody>) -> Json<Value> {
    let (shared, _tx) = state.0;

    if polar_hub_core::ingest::clears_device_state(&body.event) {
        if let Some(device) = &body.device {
            shared.devices.reset(device);
        }
    }

    let fields: Vec<(String, FieldValue)> = body
        .fields
        .into_iter()
        .filter_map(|(k, v)| json_to_field(v).map(|fv| (k, fv)))
        .collect();

    if let Some(point) = status_point(StatusEvent {
        timestamp: polar_hub_core::now_ms(),
        category: body.category,
        event: body.event,
        source: body.source,
        device: body.device,
        fields,
    }) {
        if let Err(e) = shared.store.write_points(vec![point]).await {
            tracing::warn!(error = %e, "status write failed");
        }
    }

    Json(json!({"ok": true}))
}

fn json_to_field(v: Value) -> Option<FieldValue> {
    match v {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(FieldValue::Int(i))
            } else {
                n.as_f64().map(FieldValue::Float)
            }
        }
        Value::String(s) => Some(FieldValue::Str(s)),
        Value::Bool(b) => Some(FieldValue::Bool(b)),
        _ => None,
    }
}

pub(crate) async fn handle_events(
    state: AppState,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (_shared, tx) = state.0;
    let rx = tx.subscribe();
    let stream = stream! {
        let mut rx = BroadcastStream::new(rx);
        while let Some(item) = rx.next().await {
            match item {
                Ok(snapshot) => {
                    if let Ok(data) = serde_json::to_string(&snapshot) {
                        yield Ok(Event::default().data(data));
                    }
                }
                Err(_lagged) => continue,
            }
        }
    };
    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

pub(crate) async fn handle_health(state: AppState) -> Json<Value> {
    let (shared, _tx) = state.0;
    Json(json!({"ok": true, "devices": shared.devices.len()}))
}
