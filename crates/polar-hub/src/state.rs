//! Shared application state, global statics, and memory management.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Releases unused memory back to the operating system.
/// Uses jemalloc's arena purge to reduce RSS after memory-intensive operations.
#[cfg(not(target_env = "msvc"))]
pub(crate) fn release_memory_to_os() {
    unsafe {
        // MALLCTL_ARENAS_ALL = 4096: purge dirty pages from ALL jemalloc arenas.
        tikv_jemalloc_sys::mallctl(
            c"arena.4096.purge".as_ptr().cast(),
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
            0,
        );
    }
}

#[cfg(target_env = "msvc")]
pub(crate) fn release_memory_to_os() {}

#[cfg(not(target_env = "msvc"))]
use std::ptr;
use std::sync::Arc;

use axum::extract::State;
use polar_hub_core::device::DeviceMap;
use polar_hub_core::model::HrvMetrics;
use polar_hub_core::store::Store;
use serde::Serialize;
use tokio::sync::broadcast;

/// One per-device status update fanned out over `GET /events`.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct StatusSnapshot {
    pub(crate) device: String,
    pub(crate) timestamp: i64,
    pub(crate) total_beats: u64,
    pub(crate) last_posture: Option<String>,
    pub(crate) window_hrv: Option<HrvMetrics>,
    pub(crate) window_hr: Option<f64>,
}

pub(crate) struct AppStateInner {
    pub(crate) devices: DeviceMap,
    pub(crate) store: Store,
}

pub(crate) type SharedState = Arc<AppStateInner>;

pub(crate) type AppState = State<(SharedState, broadcast::Sender<StatusSnapshot>)>;
