//! Component D: real-time ingest pipeline.

use crate::classifier::classify;
use crate::device::DeviceMap;
use crate::error::IngestError;
use crate::hrv::{compute_hrv, mean_rr};
use crate::model::{BeatPath, DeviceId, HrvMetrics, Point, measurement};
use crate::store::Store;

pub struct RealtimeBeatRequest {
    pub device: DeviceId,
    pub timestamp: Option<i64>,
    pub heart_rate: Option<f64>,
    pub rr_intervals: Vec<f64>,
    pub source: Option<String>,
    pub posture: Option<String>,
}

#[derive(Debug)]
pub struct RealtimeIngestOutcome {
    pub received: usize,
    /// HRV over the live 60-beat window, when enough beats are buffered.
    pub window_hrv: Option<HrvMetrics>,
    pub window_hr: Option<f64>,
}

/// Ingests one real-time payload. K1 (malformed input) is the only error
/// this returns; raw/realtime store failures are K3 best-effort and are
/// logged rather than propagated, so the caller always gets a 2xx once
/// validation passes.
pub async fn ingest_realtime(
    devices: &DeviceMap,
    store: &Store,
    req: RealtimeBeatRequest,
) -> Result<RealtimeIngestOutcome, IngestError> {
    if req.device.trim().is_empty() {
        return Err(IngestError::new("missing device"));
    }
    if req.rr_intervals.is_empty() {
        return Err(IngestError::new("rrIntervals must be a non-empty array"));
    }

    let handle = devices.handle(&req.device);
    let mut state = handle.lock().await;

    if state.last_processed_ms.is_none() {
        state.last_processed_ms = match store.latest_clean_timestamp(&req.device).await {
            Ok(ts) => Some(ts.unwrap_or_else(crate::now_ms)),
            Err(e) => {
                tracing::warn!(
                    device = %req.device,
                    error = %e,
                    "failed to load lastProcessedMs on device registration"
                );
                Some(crate::now_ms())
            }
        };
    }

    if let Some(posture) = req.posture {
        state.last_posture = Some(posture);
    }

    let base_ts = req.timestamp.unwrap_or_else(crate::now_ms);
    let mut points = Vec::with_capacity(req.rr_intervals.len());
    let mut offset: i64 = 0;
    let mut last_ts = base_ts;

    for &rr in &req.rr_intervals {
        let ts = base_ts + offset;
        last_ts = ts;

        let mut point = Point::new(measurement::RAW, ts)
            .with_tag("device", req.device.clone())
            .with_field("rr_interval", rr)
            .with_field("path", BeatPath::Realtime);
        if let Some(hr) = req.heart_rate {
            point = point.with_field("heart_rate", hr);
        }
        if let Some(ref source) = req.source {
            point = point.with_field("source", source.clone());
        }
        points.push(point);

        state.push_rr(rr);
        state.total_beats += 1;
        offset += rr.round() as i64;
    }

    let received = points.len();

    if let Err(e) = store.write_points(points).await {
        tracing::warn!(device = %req.device, error = %e, "raw beat write failed");
    }

    let (window_hrv, window_hr) = if state.rr_window.len() >= 4 {
        let window: Vec<f64> = state.rr_window.iter().copied().collect();
        let classified = classify(&window);
        let hrv = compute_hrv(&classified.clean_series);
        let hr = mean_rr(&classified.clean_series).map(|mean| (60_000.0 / mean).round());

        if let Some(h) = hrv {
            state.push_rmssd(h.rmssd);

            let point = Point::new(measurement::REALTIME, last_ts)
                .with_tag("device", req.device.clone())
                .with_field("rmssd", h.rmssd)
                .with_field("sdnn", h.sdnn)
                .with_field("pnn50", h.pnn50)
                .with_field("hr", hr.unwrap_or(0.0));
            if let Err(e) = store.write_points(vec![point]).await {
                tracing::warn!(device = %req.device, error = %e, "realtime HRV write failed");
            }
        }

        (hrv, hr)
    } else {
        (None, None)
    };

    Ok(RealtimeIngestOutcome {
        received,
        window_hrv,
        window_hr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn req(device: &str, ts: i64, rr: Vec<f64>) -> RealtimeBeatRequest {
        RealtimeBeatRequest {
            device: device.to_string(),
            timestamp: Some(ts),
            heart_rate: None,
            rr_intervals: rr,
            source: None,
            posture: None,
        }
    }

    #[tokio::test]
    async fn missing_device_is_rejected() {
        let devices = DeviceMap::new();
        let store = Store::Memory(MemoryStore::new());
        let mut r = req("", 1000, vec![600.0]);
        r.device = "".to_string();
        let err = ingest_realtime(&devices, &store, r).await.unwrap_err();
        assert_eq!(err.reason, "missing device");
    }

    #[tokio::test]
    async fn empty_rr_intervals_is_rejected() {
        let devices = DeviceMap::new();
        let store = Store::Memory(MemoryStore::new());
        let err = ingest_realtime(&devices, &store, req("d1", 1000, vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.reason, "rrIntervals must be a non-empty array");
    }

    #[tokio::test]
    async fn writes_one_raw_beat_per_rr_interval_with_increasing_timestamps() {
        let devices = DeviceMap::new();
        let store = Store::Memory(MemoryStore::new());
        let rr = vec![600.0, 610.0, 590.0];
        ingest_realtime(&devices, &store, req("d1", 1000, rr.clone()))
            .await
            .unwrap();

        let Store::Memory(mem) = &store else {
            unreachable!()
        };
        let points = mem.query_range(measurement::RAW, "d1", 0, 10_000);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].timestamp, 1000);
        assert_eq!(points[1].timestamp, 1600);
        assert_eq!(points[2].timestamp, 2210);
    }

    #[tokio::test]
    async fn window_hrv_requires_at_least_four_beats() {
        let devices = DeviceMap::new();
        let store = Store::Memory(MemoryStore::new());
        let outcome = ingest_realtime(&devices, &store, req("d1", 1000, vec![600.0, 610.0, 590.0]))
            .await
            .unwrap();
        assert!(outcome.window_hrv.is_none());

        let outcome = ingest_realtime(&devices, &store, req("d1", 2000, vec![605.0]))
            .await
            .unwrap();
        assert!(outcome.window_hrv.is_some());
    }
}
