//! Component E: batch deduplicator for retroactive mobile-client uploads.

use crate::device::DeviceMap;
use crate::error::IngestError;
use crate::model::{BeatPath, DeviceId, Point, RawBeat, measurement};
use crate::store::Store;

const BOUNDARY_PAD_MS: i64 = 2000;
const GAP_THRESHOLD_MS: i64 = 300;
const TOLERANCE_MS: i64 = 300;
const WRITE_CHUNK_SIZE: usize = 5000;

pub struct BatchBeat {
    pub timestamp: i64,
    pub heart_rate: Option<f64>,
    pub rr_intervals: Option<Vec<f64>>,
}

pub struct BatchIngestRequest {
    pub device: DeviceId,
    pub source: Option<String>,
    pub beats: Vec<BatchBeat>,
}

pub struct BatchIngestOutcome {
    pub received: usize,
    pub new: usize,
    pub duplicates: usize,
}

struct FlatBeat {
    ts: i64,
    rr: Option<f64>,
    hr: Option<f64>,
}

/// Ingests a retroactive batch upload. Store read/write failures during
/// this path are K2 (transient) and propagate to the caller as a 5xx.
pub async fn ingest_batch(
    devices: &DeviceMap,
    store: &Store,
    req: BatchIngestRequest,
) -> Result<BatchIngestOutcome, IngestError> {
    if req.device.trim().is_empty() {
        return Err(IngestError::new("missing device"));
    }
    if req.beats.is_empty() {
        return Err(IngestError::new("beats must be a non-empty array"));
    }

    let incoming = flatten(&req.beats);
    let received = incoming.len();
    if incoming.is_empty() {
        return Ok(BatchIngestOutcome {
            received: 0,
            new: 0,
            duplicates: 0,
        });
    }

    let first_ts = incoming.first().unwrap().ts;
    let last_ts = incoming.last().unwrap().ts;

    let existing_points = store
        .query_range(
            measurement::RAW,
            &req.device,
            first_ts - BOUNDARY_PAD_MS,
            last_ts + BOUNDARY_PAD_MS,
        )
        .await
        .map_err(|e| IngestError::store(format!("InfluxDB read failed: {e}")))?;
    let existing: Vec<RawBeat> = existing_points
        .iter()
        .filter_map(RawBeat::from_point)
        .filter(RawBeat::has_positive_rr)
        .collect();

    let gaps = detect_gaps(&existing, first_ts, last_ts);

    let new_beats: Vec<&FlatBeat> = incoming
        .iter()
        .filter(|b| {
            gaps.iter()
                .any(|g| g.0 - TOLERANCE_MS <= b.ts && b.ts <= g.1 + TOLERANCE_MS)
        })
        .collect();
    let new_count = new_beats.len();

    let points: Vec<Point> = new_beats
        .iter()
        .map(|b| {
            let mut point = Point::new(measurement::RAW, b.ts)
                .with_tag("device", req.device.clone())
                .with_field("path", BeatPath::Batch);
            if let Some(rr) = b.rr {
                point = point.with_field("rr_interval", rr);
            }
            if let Some(hr) = b.hr {
                point = point.with_field("heart_rate", hr);
            }
            if let Some(ref source) = req.source {
                point = point.with_field("source", source.clone());
            }
            point
        })
        .collect();

    for chunk in points.chunks(WRITE_CHUNK_SIZE) {
        store
            .write_points(chunk.to_vec())
            .await
            .map_err(|e| IngestError::store(format!("InfluxDB write failed: {e}")))?;
    }

    let handle = devices.handle(&req.device);
    let mut state = handle.lock().await;
    state.rewind_last_processed(first_ts);

    Ok(BatchIngestOutcome {
        received,
        new: new_count,
        duplicates: received - new_count,
    })
}

fn flatten(beats: &[BatchBeat]) -> Vec<FlatBeat> {
    let mut incoming = Vec::new();
    for beat in beats {
        match &beat.rr_intervals {
            Some(rrs) if !rrs.is_empty() => {
                let mut offset: i64 = 0;
                for &rr in rrs {
                    incoming.push(FlatBeat {
                        ts: beat.timestamp + offset,
                        rr: Some(rr),
                        hr: beat.heart_rate,
                    });
                    offset += rr.round() as i64;
                }
            }
            _ => incoming.push(FlatBeat {
                ts: beat.timestamp,
                rr: None,
                hr: beat.heart_rate,
            }),
        }
    }
    incoming.sort_by_key(|b| b.ts);
    incoming
}

/// Builds the gap list an incoming batch is checked against: each gap is a
/// `[start, end]` timestamp range not already densely covered by existing
/// raw beats.
fn detect_gaps(existing: &[RawBeat], first_ts: i64, last_ts: i64) -> Vec<(i64, i64)> {
    if existing.is_empty() {
        return vec![(first_ts, last_ts)];
    }

    let mut gaps = Vec::new();

    for pair in existing.windows(2) {
        let a = &pair[0];
        let b = &pair[1];
        let a_end = a.timestamp + a.rr_interval.unwrap_or(0.0).round() as i64;
        if b.timestamp - a_end > GAP_THRESHOLD_MS {
            gaps.push((a_end, b.timestamp));
        }
    }

    let first_existing = existing.first().unwrap();
    if first_ts < first_existing.timestamp - GAP_THRESHOLD_MS {
        gaps.push((first_ts, first_existing.timestamp));
    }

    let last_existing = existing.last().unwrap();
    let last_existing_end =
        last_existing.timestamp + last_existing.rr_interval.unwrap_or(0.0).round() as i64;
    if last_ts > last_existing_end + GAP_THRESHOLD_MS {
        gaps.push((last_existing_end, last_ts + BOUNDARY_PAD_MS));
    }

    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn beats(start: i64, count: usize, rr: f64, skip: Option<usize>) -> Vec<BatchBeat> {
        (0..count)
            .filter(|i| skip != Some(*i))
            .map(|i| BatchBeat {
                timestamp: start + i as i64 * rr as i64,
                heart_rate: None,
                rr_intervals: Some(vec![rr]),
            })
            .collect()
    }

    #[tokio::test]
    async fn pure_duplicate_batch_adds_nothing() {
        let devices = DeviceMap::new();
        let store = Store::Memory(MemoryStore::new());

        // Seed 60 beats as if via /beats.
        let points: Vec<Point> = (0..60)
            .map(|i| {
                Point::new(measurement::RAW, 1000 * i)
                    .with_tag("device", "d1")
                    .with_field("rr_interval", 1000.0)
                    .with_field("path", BeatPath::Realtime)
            })
            .collect();
        store.write_points(points).await.unwrap();

        let outcome = ingest_batch(
            &devices,
            &store,
            BatchIngestRequest {
                device: "d1".into(),
                source: None,
                beats: beats(0, 60, 1000.0, None),
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.received, 60);
        assert_eq!(outcome.new, 0);
        assert_eq!(outcome.duplicates, 60);

        let Store::Memory(mem) = &store else {
            unreachable!()
        };
        assert_eq!(mem.point_count(), 60);
    }

    #[tokio::test]
    async fn single_gap_is_filled() {
        let devices = DeviceMap::new();
        let store = Store::Memory(MemoryStore::new());

        let points: Vec<Point> = (0..60)
            .filter(|&i| i != 30)
            .map(|i| {
                Point::new(measurement::RAW, 1000 * i)
                    .with_tag("device", "d1")
                    .with_field("rr_interval", 1000.0)
                    .with_field("path", BeatPath::Realtime)
            })
            .collect();
        store.write_points(points).await.unwrap();

        let outcome = ingest_batch(
            &devices,
            &store,
            BatchIngestRequest {
                device: "d1".into(),
                source: None,
                beats: beats(0, 60, 1000.0, None),
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.received, 60);
        assert_eq!(outcome.new, 1);
        assert_eq!(outcome.duplicates, 59);

        let Store::Memory(mem) = &store else {
            unreachable!()
        };
        assert_eq!(mem.point_count(), 60);
    }

    #[tokio::test]
    async fn empty_store_accepts_the_whole_batch() {
        let devices = DeviceMap::new();
        let store = Store::Memory(MemoryStore::new());

        let outcome = ingest_batch(
            &devices,
            &store,
            BatchIngestRequest {
                device: "d1".into(),
                source: None,
                beats: beats(0, 10, 1000.0, None),
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.received, 10);
        assert_eq!(outcome.new, 10);
        assert_eq!(outcome.duplicates, 0);
    }

    #[tokio::test]
    async fn rewinds_last_processed_on_notify() {
        let devices = DeviceMap::new();
        let store = Store::Memory(MemoryStore::new());
        let handle = devices.handle("d1");
        handle.lock().await.last_processed_ms = Some(50_000);

        ingest_batch(
            &devices,
            &store,
            BatchIngestRequest {
                device: "d1".into(),
                source: None,
                beats: beats(10_000, 5, 1000.0, None),
            },
        )
        .await
        .unwrap();

        assert_eq!(handle.lock().await.last_processed_ms, Some(10_000));
    }
}
