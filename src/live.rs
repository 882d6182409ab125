// src/live.rs
//
// Live run counters shared between workers, the auto-termination detector
// and the monitor endpoint. Workers only touch atomics and a mutex-guarded
// HDR histogram; nothing here blocks the I/O path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

pub struct LiveStats {
    ops: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
    // Latency in microseconds, one histogram across all op types.
    hist: Mutex<Histogram<u64>>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct LiveSnapshot {
    pub ops: u64,
    pub bytes: u64,
    pub errors: u64,
    pub p50_ms: f64,
    pub p99_ms: f64,
}

impl LiveStats {
    pub fn new() -> Self {
        LiveStats {
            ops: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            hist: Mutex::new(
                Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3)
                    .expect("failed to allocate histogram"),
            ),
        }
    }

    pub fn record(&self, duration: Duration, bytes: u64, is_error: bool) {
        self.ops.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        if is_error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        let micros = (duration.as_micros() as u64).max(1);
        let mut hist = self.hist.lock().unwrap();
        let _ = hist.record(micros);
    }

    pub fn totals(&self) -> (u64, u64) {
        (self.ops.load(Ordering::Relaxed), self.bytes.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        let hist = self.hist.lock().unwrap();
        LiveSnapshot {
            ops: self.ops.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            p50_ms: hist.value_at_quantile(0.50) as f64 / 1000.0,
            p99_ms: hist.value_at_quantile(0.99) as f64 / 1000.0,
        }
    }
}

impl Default for LiveStats {
    fn default() -> Self {
        Self::new()
    }
}
