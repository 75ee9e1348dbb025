//! Error types for the store and ingest pipeline.
//!
//! Hand-rolled (no `thiserror`) to match the rest of the workspace: a
//! `Display` impl for operator-facing messages, `std::error::Error` for
//! composition, and `From` impls at the few conversion seams that need them.

use std::fmt;

/// Failure kind for any `TimeSeriesStore` operation (K2/K3 in the ingest
/// error taxonomy — callers decide whether a given failure is surfaced or
/// swallowed).
#[derive(Debug)]
pub enum StoreError {
    /// The backing store did not respond within the request deadline.
    Timeout,
    /// The backing store rejected the write or query.
    Backend(String),
    /// Transport-level failure reaching the backend (connection refused,
    /// DNS failure, TLS error, ...).
    Transport(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Timeout => write!(f, "store request timed out"),
            StoreError::Backend(msg) => write!(f, "store backend error: {}", msg),
            StoreError::Transport(msg) => write!(f, "store transport error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Transport(e.to_string())
        }
    }
}

/// Which ingest failure taxonomy bucket an `IngestError` falls into —
/// callers (the HTTP layer) use this to pick a status code: K1 is a client
/// error (400), K2 is a transient backend failure (500).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestErrorKind {
    /// K1: malformed ingest payload.
    Malformed,
    /// K2: the store failed to read or write during the ingest path.
    Store,
}

/// Carries a caller-facing reason string plus the taxonomy bucket it falls
/// into (see [`IngestErrorKind`]).
#[derive(Debug)]
pub struct IngestError {
    pub kind: IngestErrorKind,
    pub reason: String,
}

impl IngestError {
    /// K1: malformed payload.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            kind: IngestErrorKind::Malformed,
            reason: reason.into(),
        }
    }

    /// K2: store read/write failure during ingest.
    pub fn store(reason: impl Into<String>) -> Self {
        Self {
            kind: IngestErrorKind::Store,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for IngestError {}
