//! polar-hub-core — the beat-processing pipeline for the wearable HRV
//! ingestion service.
//!
//! - `classifier` — Lipponen-Tarvainen RR artifact classifier (component A)
//! - `hrv` — RMSSD/SDNN/pNN50 time-domain metrics (component B)
//! - `store` — time-series store adapter, in-memory and InfluxDB-backed (component C)
//! - `ingest` — real-time ingest and batch deduplication (components D, E)
//! - `postprocess` — deferred reconciliation and summary recomputation (component F)
//! - `device` — per-device state and the concurrency-safe device map
//! - `model` — shared wire/storage types
//! - `config` — runtime configuration
//! - `error` — store and ingest error types

pub mod classifier;
pub mod config;
pub mod device;
pub mod error;
pub mod hrv;
pub mod ingest;
pub mod model;
pub mod postprocess;
pub mod store;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
