//! Component F: the deferred post-processor.
//!
//! Timer-driven; re-runs the classifier with full left/right context over
//! beats older than the 120s buffer, writes canonical fields, inserts
//! synthetic beats for split artifacts, and recomputes five-minute HRV
//! summaries for affected windows.

use crate::classifier::classify;
use crate::device::{DeviceMap, DeviceState};
use crate::error::StoreError;
use crate::hrv::{compute_hrv, mean_rr};
use crate::model::{ArtifactType, Point, RawBeat, hr_from_rr, measurement};
use crate::store::Store;

/// Classification lags ingest by this much; the 91-beat right-context
/// window is worst-case ~91s at resting HR, so 120s guarantees context
/// exists before a beat is classified.
pub const BUFFER_MS: i64 = 120_000;
pub const CONTEXT_BEATS: usize = 91;
pub const SUMMARY_WINDOW_MS: i64 = 300_000;
pub const MIN_SUMMARY_SAMPLES: usize = 10;
pub const TICK_INTERVAL_SECS: u64 = 60;
const MIN_CONTEXT_RR_VALUES: usize = 4;

/// Runs one tick across every registered device. A single device's failure
/// is logged and does not stall the others.
pub async fn run_tick(devices: &DeviceMap, store: &Store) {
    for device in devices.device_ids() {
        let handle = devices.handle(&device);
        let mut state = handle.lock().await;
        if let Err(e) = process_device(&device, &mut state, store).await {
            tracing::warn!(device = %device, error = %e, "post-processor tick failed for device");
        }
    }
}

async fn process_device(
    device: &str,
    state: &mut DeviceState,
    store: &Store,
) -> Result<(), StoreError> {
    let now = crate::now_ms();
    let cutoff = now - BUFFER_MS;

    if state.last_processed_ms.is_none() {
        state.last_processed_ms = Some(store.latest_clean_timestamp(device).await?.unwrap_or(now));
    }
    let last_processed_ms = state.last_processed_ms.unwrap();

    if last_processed_ms >= cutoff {
        return Ok(());
    }

    let left = query_positive_rr(store, device, i64::MIN, last_processed_ms - 1).await?;
    let left = tail(left, CONTEXT_BEATS);

    let target = query_positive_rr(store, device, last_processed_ms, cutoff).await?;

    let mut right = query_positive_rr(store, device, cutoff + 1, i64::MAX).await?;
    right.truncate(CONTEXT_BEATS);

    if left.len() + target.len() + right.len() < MIN_CONTEXT_RR_VALUES {
        state.last_processed_ms = Some(cutoff);
        return Ok(());
    }

    let mut combined_rr = Vec::with_capacity(left.len() + target.len() + right.len());
    combined_rr.extend(left.iter().filter_map(|b| b.rr_interval));
    combined_rr.extend(target.iter().filter_map(|b| b.rr_interval));
    combined_rr.extend(right.iter().filter_map(|b| b.rr_interval));

    let classified = classify(&combined_rr);

    let target_start = left.len();
    let target_end = target_start + target.len();
    let target_results = &classified.results[target_start..target_end];

    let mut writes = Vec::with_capacity(target.len() * 2);
    for (beat, result) in target.iter().zip(target_results) {
        match result.artifact_type {
            ArtifactType::Missed => {
                let rr_clean = result.rr_clean.expect("missed beats always carry rr_clean");
                let hr_clean = hr_from_rr(rr_clean);
                writes.push(canonical_point(
                    device,
                    beat.timestamp,
                    rr_clean,
                    hr_clean,
                    ArtifactType::Missed,
                ));
                let synthetic_ts = beat.timestamp + rr_clean.round() as i64;
                writes.push(
                    Point::new(measurement::RAW, synthetic_ts)
                        .with_tag("device", device)
                        .with_field("rr_clean", rr_clean)
                        .with_field("hr_clean", hr_clean.unwrap_or(0.0))
                        .with_field("artifact_type", ArtifactType::MissedInserted),
                );
            }
            ArtifactType::ExtraAbsorbed => {
                writes.push(canonical_point(
                    device,
                    beat.timestamp,
                    0.0,
                    Some(0.0),
                    ArtifactType::ExtraAbsorbed,
                ));
            }
            other => {
                let rr_clean = result.rr_clean.unwrap_or(0.0);
                let hr_clean = hr_from_rr(rr_clean);
                writes.push(canonical_point(device, beat.timestamp, rr_clean, hr_clean, other));
            }
        }
    }

    store.write_points(writes).await?;
    state.last_processed_ms = Some(cutoff);

    recompute_summaries(
        device,
        store,
        last_processed_ms,
        cutoff,
        now,
        state.last_posture.as_deref(),
    )
    .await?;

    Ok(())
}

async fn query_positive_rr(
    store: &Store,
    device: &str,
    start: i64,
    end: i64,
) -> Result<Vec<RawBeat>, StoreError> {
    let points = store.query_range(measurement::RAW, device, start, end).await?;
    Ok(points
        .iter()
        .filter_map(RawBeat::from_point)
        .filter(RawBeat::has_positive_rr)
        .collect())
}

/// Keeps at most the last `n` elements (oldest-first order preserved).
fn tail(mut v: Vec<RawBeat>, n: usize) -> Vec<RawBeat> {
    if v.len() > n {
        v = v.split_off(v.len() - n);
    }
    v
}

fn canonical_point(
    device: &str,
    timestamp: i64,
    rr_clean: f64,
    hr_clean: Option<f64>,
    artifact_type: ArtifactType,
) -> Point {
    Point::new(measurement::RAW, timestamp)
        .with_tag("device", device)
        .with_field("rr_clean", rr_clean)
        .with_field("hr_clean", hr_clean.unwrap_or(0.0))
        .with_field("artifact_type", artifact_type)
}

/// Recomputes every five-minute window whose end falls inside `[start, end]`
/// and is not in the future.
async fn recompute_summaries(
    device: &str,
    store: &Store,
    start: i64,
    end: i64,
    now: i64,
    posture: Option<&str>,
) -> Result<(), StoreError> {
    let first_window_start = start.div_euclid(SUMMARY_WINDOW_MS) * SUMMARY_WINDOW_MS;
    let last_window_start = end.div_euclid(SUMMARY_WINDOW_MS) * SUMMARY_WINDOW_MS;

    let mut window_start = first_window_start;
    while window_start <= last_window_start {
        let window_end = window_start + SUMMARY_WINDOW_MS;
        if window_end <= now {
            recompute_one_summary(device, store, window_start, window_end, posture).await?;
        }
        window_start += SUMMARY_WINDOW_MS;
    }
    Ok(())
}

async fn recompute_one_summary(
    device: &str,
    store: &Store,
    window_start: i64,
    window_end: i64,
    posture: Option<&str>,
) -> Result<(), StoreError> {
    let points = store
        .query_range(measurement::RAW, device, window_start, window_end - 1)
        .await?;
    let beats: Vec<RawBeat> = points.iter().filter_map(RawBeat::from_point).collect();

    let clean: Vec<f64> = beats
        .iter()
        .filter_map(|b| b.rr_clean)
        .filter(|&v| v > 0.0)
        .collect();
    if clean.len() < MIN_SUMMARY_SAMPLES {
        return Ok(());
    }

    let hrv = compute_hrv(&clean).expect("length checked above");
    let mean = mean_rr(&clean).expect("non-empty, checked above");
    let avg_hr = (60_000.0 / mean).round();
    let artifact_count = beats
        .iter()
        .filter(|b| b.artifact_type.is_some_and(|t| t != ArtifactType::None))
        .count();

    let mut point = Point::new(measurement::HRV_SUMMARY, window_end)
        .with_tag("device", device)
        .with_field("rmssd", hrv.rmssd)
        .with_field("sdnn", hrv.sdnn)
        .with_field("pnn50", hrv.pnn50)
        .with_field("heart_rate", avg_hr)
        .with_field("sample_count", clean.len() as i64)
        .with_field("artifact_count", artifact_count as i64);
    if let Some(posture) = posture {
        point = point.with_tag("posture", posture);
    }

    store.write_points(vec![point]).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BeatPath;
    use crate::store::MemoryStore;

    fn raw(device: &str, ts: i64, rr: f64, path: BeatPath) -> Point {
        Point::new(measurement::RAW, ts)
            .with_tag("device", device)
            .with_field("rr_interval", rr)
            .with_field("path", path)
    }

    #[tokio::test]
    async fn skips_devices_not_past_the_buffer() {
        let devices = DeviceMap::new();
        let store = Store::Memory(MemoryStore::new());
        let handle = devices.handle("d1");
        let unchanged = crate::now_ms();
        handle.lock().await.last_processed_ms = Some(unchanged);

        run_tick(&devices, &store).await;

        assert_eq!(handle.lock().await.last_processed_ms, Some(unchanged));
    }

    #[tokio::test]
    async fn classifies_target_range_and_advances_cutoff() {
        let devices = DeviceMap::new();
        let store = Store::Memory(MemoryStore::new());

        let now = crate::now_ms();
        let old_enough = now - BUFFER_MS - 60_000;

        let points: Vec<Point> = (0..10)
            .map(|i| raw("d1", old_enough + i * 600, 600.0, BeatPath::Realtime))
            .collect();
        store.write_points(points).await.unwrap();

        let handle = devices.handle("d1");
        handle.lock().await.last_processed_ms = Some(old_enough - 1);

        run_tick(&devices, &store).await;

        let new_cutoff = handle.lock().await.last_processed_ms.unwrap();
        assert!(new_cutoff > old_enough);

        let Store::Memory(mem) = &store else {
            unreachable!()
        };
        let raw_points = mem.query_range(measurement::RAW, "d1", 0, now);
        assert!(
            raw_points
                .iter()
                .all(|p| p.field_f64("rr_clean").is_some() || p.timestamp > new_cutoff)
        );
    }

    #[tokio::test]
    async fn missed_beat_inserts_synthetic_beat() {
        let devices = DeviceMap::new();
        let store = Store::Memory(MemoryStore::new());

        let now = crate::now_ms();
        let base = now - BUFFER_MS - 60_000;
        let rr = [605.0, 612.0, 1210.0, 598.0, 610.0, 600.0, 610.0];
        let mut ts = base;
        let mut points = Vec::new();
        for &v in &rr {
            points.push(raw("d1", ts, v, BeatPath::Realtime));
            ts += v.round() as i64;
        }
        store.write_points(points).await.unwrap();

        let handle = devices.handle("d1");
        handle.lock().await.last_processed_ms = Some(base - 1);

        run_tick(&devices, &store).await;

        let Store::Memory(mem) = &store else {
            unreachable!()
        };
        let all = mem.query_range(measurement::RAW, "d1", 0, now);
        let synthetic = all
            .iter()
            .filter(|p| p.field_str("artifact_type") == Some("missed_inserted"))
            .count();
        assert_eq!(synthetic, 1);
    }
}
