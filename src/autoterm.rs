// src/autoterm.rs
//
// Throughput stability detector for early benchmark termination.
//
// The observed elapsed window is segmented at 25 equal slices. The run is
// considered stable once the warm-up has passed (elapsed >= min duration)
// and the 6 most recent slices' throughput all lie within the configured
// tolerance of the whole-window mean. Throughput is bytes/sec when any
// operation moved bytes, else operations/sec.

use std::time::{Duration, Instant};

const SLICES: usize = 25;
const STABLE_SLICES: usize = 6;

#[derive(Debug, Clone, Copy)]
pub struct AutoTermConfig {
    /// Minimum elapsed time before the detector may trigger.
    pub dur: Duration,
    /// Tolerance as a fraction of the window mean (e.g. 0.075 for 7.5%).
    pub pct: f64,
}

/// Cumulative (elapsed, ops, bytes) samples with stability checking.
pub struct AutoTermDetector {
    cfg: AutoTermConfig,
    started: Option<Instant>,
    samples: Vec<Sample>,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Duration,
    ops: u64,
    bytes: u64,
}

impl AutoTermDetector {
    pub fn new(cfg: AutoTermConfig) -> Self {
        AutoTermDetector {
            cfg,
            started: None,
            samples: Vec::new(),
        }
    }

    /// Feed the current cumulative totals; returns true when the run is
    /// stable and may be terminated.
    pub fn observe(&mut self, now: Instant, total_ops: u64, total_bytes: u64) -> bool {
        let started = *self.started.get_or_insert(now);
        let elapsed = now - started;
        self.samples.push(Sample {
            at: elapsed,
            ops: total_ops,
            bytes: total_bytes,
        });
        self.stable(elapsed)
    }

    fn stable(&self, elapsed: Duration) -> bool {
        if elapsed < self.cfg.dur || self.samples.len() < SLICES {
            return false;
        }
        let last = match self.samples.last() {
            Some(s) => *s,
            None => return false,
        };
        let use_bytes = last.bytes > 0;
        let total = if use_bytes { last.bytes } else { last.ops } as f64;
        if total <= 0.0 {
            return false;
        }
        let mean_rate = total / elapsed.as_secs_f64();

        // Cumulative value interpolated at each slice boundary.
        let slice = elapsed.as_secs_f64() / SLICES as f64;
        let at = |t: f64| -> f64 { self.interpolate(t, use_bytes) };
        let low = mean_rate * (1.0 - self.cfg.pct);
        let high = mean_rate * (1.0 + self.cfg.pct);
        for i in (SLICES - STABLE_SLICES)..SLICES {
            let lo = slice * i as f64;
            let hi = slice * (i + 1) as f64;
            let rate = (at(hi) - at(lo)) / slice;
            if rate < low || rate > high {
                return false;
            }
        }
        true
    }

    /// Linear interpolation of the cumulative counter at elapsed second `t`.
    fn interpolate(&self, t: f64, use_bytes: bool) -> f64 {
        let value = |s: &Sample| if use_bytes { s.bytes } else { s.ops } as f64;
        let mut prev = Sample {
            at: Duration::ZERO,
            ops: 0,
            bytes: 0,
        };
        for s in &self.samples {
            let at = s.at.as_secs_f64();
            if at >= t {
                let prev_at = prev.at.as_secs_f64();
                let span = at - prev_at;
                if span <= f64::EPSILON {
                    return value(s);
                }
                let frac = (t - prev_at) / span;
                return value(&prev) + (value(s) - value(&prev)) * frac;
            }
            prev = *s;
        }
        value(&prev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_detector(cfg: AutoTermConfig, rates: &[u64], tick: Duration) -> Option<Duration> {
        // Feed cumulative totals produced by per-tick byte rates; return the
        // elapsed time at which the detector triggered.
        let mut det = AutoTermDetector::new(cfg);
        let start = Instant::now();
        let mut total = 0u64;
        for (i, rate) in rates.iter().enumerate() {
            total += rate;
            let now = start + tick * (i as u32 + 1);
            if det.observe(now, (i + 1) as u64, total) {
                return Some(tick * (i as u32 + 1));
            }
        }
        None
    }

    #[test]
    fn test_stable_run_triggers_after_warmup() {
        let cfg = AutoTermConfig {
            dur: Duration::from_secs(5),
            pct: 0.10,
        };
        // 100 ticks of 250ms at a perfectly flat 1 MiB per tick.
        let rates = vec![1 << 20; 120];
        let fired = run_detector(cfg, &rates, Duration::from_millis(250))
            .expect("stable run must auto-terminate");
        assert!(fired >= Duration::from_secs(5), "fired too early: {fired:?}");
        assert!(fired <= Duration::from_secs(15), "fired too late: {fired:?}");
    }

    #[test]
    fn test_unstable_run_never_triggers() {
        let cfg = AutoTermConfig {
            dur: Duration::from_secs(10),
            pct: 0.05,
        };
        // Alternating 2.5s blocks of 1x and 3x throughput: once the warm-up
        // has passed, the recent window always sits far from the whole-run
        // mean.
        let rates: Vec<u64> = (0..100)
            .map(|i| if (i / 10) % 2 == 0 { 1 << 20 } else { 3 << 20 })
            .collect();
        assert!(run_detector(cfg, &rates, Duration::from_millis(250)).is_none());
    }

    #[test]
    fn test_ops_metric_when_no_bytes() {
        let cfg = AutoTermConfig {
            dur: Duration::from_secs(2),
            pct: 0.10,
        };
        let mut det = AutoTermDetector::new(cfg);
        let start = Instant::now();
        let mut fired = false;
        for i in 1..=60u64 {
            let now = start + Duration::from_millis(250) * i as u32;
            // Zero bytes: stat-style workload measured in ops/sec.
            if det.observe(now, i * 100, 0) {
                fired = true;
                break;
            }
        }
        assert!(fired);
    }
}
