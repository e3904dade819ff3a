//! Process-wide knobs read from the environment once and cached.
//!
//! `BLOCKVEIL_MAX_INFLIGHT` overrides the asynchronous cipher backend's
//! in-flight ceiling; unset or unparseable falls back to the compiled
//! default. Cached in an atomic rather than behind a blocking `OnceLock`:
//! the worker queue and the mapper may be entered from a caller context
//! that must never block on first access.

use std::sync::atomic::{AtomicUsize, Ordering};

use blockveil_core::cipher::DEFAULT_MAX_INFLIGHT;

const UNRESOLVED: usize = usize::MAX;

static CACHED_MAX_INFLIGHT: AtomicUsize = AtomicUsize::new(UNRESOLVED);

/// Returns the configured in-flight ceiling for the asynchronous cipher
/// backend, resolving and caching it from `BLOCKVEIL_MAX_INFLIGHT` on
/// first call.
pub fn max_inflight() -> usize {
    let cached = CACHED_MAX_INFLIGHT.load(Ordering::Relaxed);
    if cached != UNRESOLVED {
        return cached;
    }
    let resolved = std::env::var("BLOCKVEIL_MAX_INFLIGHT")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_MAX_INFLIGHT);
    CACHED_MAX_INFLIGHT.store(resolved, Ordering::Relaxed);
    resolved
}
