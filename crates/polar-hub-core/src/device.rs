//! Per-device in-memory state and the concurrency-safe device map.
//!
//! `DeviceMap` hands out one `Arc<Mutex<DeviceState>>` per device. `DashMap`
//! is used only for the short, synchronous get-or-insert of that handle;
//! the returned `tokio::sync::Mutex` is then held across the `.await`
//! points of the actual ingest/post-process work, which is what gives the
//! "never overlap for one device" guarantee without a single global lock.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::model::DeviceId;

const RR_WINDOW_CAPACITY: usize = 60;
const RMSSD_BUFFER_CAPACITY: usize = 30;

#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    /// Last `RR_WINDOW_CAPACITY` raw RR values (real-time window).
    pub rr_window: VecDeque<f64>,
    /// Last `RMSSD_BUFFER_CAPACITY` RMSSD readings (dashboard series).
    pub rmssd_buffer: VecDeque<f64>,
    pub total_beats: u64,
    pub last_posture: Option<String>,
    /// High-water mark: every beat with `timestamp < last_processed_ms` has
    /// been classified by the post-processor.
    pub last_processed_ms: Option<i64>,
}

impl DeviceState {
    pub fn push_rr(&mut self, rr: f64) {
        self.rr_window.push_back(rr);
        while self.rr_window.len() > RR_WINDOW_CAPACITY {
            self.rr_window.pop_front();
        }
    }

    pub fn push_rmssd(&mut self, rmssd: f64) {
        self.rmssd_buffer.push_back(rmssd);
        while self.rmssd_buffer.len() > RMSSD_BUFFER_CAPACITY {
            self.rmssd_buffer.pop_front();
        }
    }

    /// `lastProcessedMs` only ever moves backwards through an explicit
    /// reprocess notification, never forwards through one (I2).
    pub fn rewind_last_processed(&mut self, from: i64) {
        self.last_processed_ms = Some(match self.last_processed_ms {
            Some(current) => current.min(from),
            None => from,
        });
    }
}

#[derive(Clone, Default)]
pub struct DeviceMap {
    devices: Arc<DashMap<DeviceId, Arc<Mutex<DeviceState>>>>,
}

impl DeviceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the device's handle, creating fresh (empty) state if this is
    /// the first time the device has been seen.
    pub fn handle(&self, device: &str) -> Arc<Mutex<DeviceState>> {
        self.devices
            .entry(device.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DeviceState::default())))
            .clone()
    }

    /// Drops a device's in-memory state entirely, per the `ble.disconnected`
    /// lifecycle rule. `lastProcessedMs` is rebuilt from the store on the
    /// device's next beat.
    pub fn reset(&self, device: &str) {
        self.devices.remove(device);
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rr_window_evicts_oldest_beyond_capacity() {
        let mut state = DeviceState::default();
        for i in 0..70 {
            state.push_rr(i as f64);
        }
        assert_eq!(state.rr_window.len(), RR_WINDOW_CAPACITY);
        assert_eq!(state.rr_window.front(), Some(&10.0));
    }

    #[test]
    fn rewind_only_moves_backwards() {
        let mut state = DeviceState::default();
        state.last_processed_ms = Some(10_000);
        state.rewind_last_processed(12_000);
        assert_eq!(state.last_processed_ms, Some(10_000));
        state.rewind_last_processed(5_000);
        assert_eq!(state.last_processed_ms, Some(5_000));
    }

    #[tokio::test]
    async fn handle_is_shared_across_lookups() {
        let map = DeviceMap::new();
        let h1 = map.handle("d1");
        {
            let mut guard = h1.lock().await;
            guard.total_beats = 5;
        }
        let h2 = map.handle("d1");
        assert_eq!(h2.lock().await.total_beats, 5);
    }

    #[test]
    fn reset_drops_state() {
        let map = DeviceMap::new();
        let _ = map.handle("d1");
        assert_eq!(map.len(), 1);
        map.reset("d1");
        assert_eq!(map.len(), 0);
    }
}
