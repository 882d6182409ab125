// src/aggregate/segments.rs
//
// Fixed-width time-window segmenting over an operations log.
//
// Segments tile the active range [from, to) left-closed right-open. A record
// straddling a boundary contributes bytes/ops/objects to each touched window
// in proportion to its temporal overlap; `full_ops` counts only operations
// that fit wholly inside the window, and is the basis for windowed
// operations-per-second.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::record::Operations;

/// Candidate segment widths, smallest first.
const DURATION_LADDER: [Duration; 8] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(15),
    Duration::from_secs(60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(15 * 60),
    Duration::from_secs(3600),
    Duration::from_secs(3 * 3600),
];

/// Upper bound on segments produced by the default ladder.
const MAX_SEGMENTS: u32 = 400;

#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    pub start: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Fractional operation count (boundary-straddling ops split).
    pub ops: f64,
    /// Operations wholly inside the window.
    pub full_ops: u64,
    pub bytes: f64,
    pub objects: f64,
    pub errors: u64,
}

impl Segment {
    pub fn bps(&self) -> f64 {
        if self.duration.is_zero() {
            return 0.0;
        }
        self.bytes / self.duration.as_secs_f64()
    }

    pub fn ops_per_sec(&self) -> f64 {
        if self.duration.is_zero() {
            return 0.0;
        }
        self.full_ops as f64 / self.duration.as_secs_f64()
    }
}

/// Smallest ladder entry producing at most 400 segments over `total`;
/// zero when the range is empty.
pub fn default_segment_duration(total: Duration) -> Duration {
    if total.is_zero() {
        return Duration::ZERO;
    }
    for d in DURATION_LADDER {
        if total.as_secs_f64() / d.as_secs_f64() <= MAX_SEGMENTS as f64 {
            return d;
        }
    }
    DURATION_LADDER[DURATION_LADDER.len() - 1]
}

/// Tile `[from, to)` with `delta`-wide segments and attribute every record.
pub fn segment_log(
    ops: &Operations,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    delta: Duration,
) -> Vec<Segment> {
    if delta.is_zero() || to <= from {
        return Vec::new();
    }
    let total = (to - from).to_std().unwrap_or_default();
    let count = (total.as_secs_f64() / delta.as_secs_f64()).ceil() as usize;
    let delta_chrono = chrono::Duration::from_std(delta).unwrap_or(chrono::Duration::zero());
    let mut segments: Vec<Segment> = (0..count)
        .map(|i| Segment {
            start: from + delta_chrono * i as i32,
            duration: delta,
            ops: 0.0,
            full_ops: 0,
            bytes: 0.0,
            objects: 0.0,
            errors: 0,
        })
        .collect();

    let idx_of = |t: DateTime<Utc>| -> i64 {
        let offset = (t - from).num_nanoseconds().unwrap_or(0);
        offset.div_euclid(delta_chrono.num_nanoseconds().unwrap_or(1))
    };

    for op in ops.iter() {
        if op.end <= from || op.start >= to {
            continue;
        }
        let first = idx_of(op.start).clamp(0, count as i64 - 1) as usize;
        let last = idx_of(op.end).clamp(0, count as i64 - 1) as usize;
        let op_dur = (op.end - op.start).num_nanoseconds().unwrap_or(0).max(0);

        if op.is_error() {
            segments[first].errors += 1;
        }
        if op_dur == 0 {
            // Point records land wholly in the window containing start.
            let seg = &mut segments[first];
            seg.ops += 1.0;
            seg.full_ops += 1;
            seg.bytes += op.bytes as f64;
            seg.objects += op.object_count as f64;
            continue;
        }
        for seg in segments.iter_mut().take(last + 1).skip(first) {
            let seg_end = seg.start + delta_chrono;
            let overlap_start = op.start.max(seg.start);
            let overlap_end = op.end.min(seg_end);
            let overlap = (overlap_end - overlap_start).num_nanoseconds().unwrap_or(0);
            if overlap <= 0 {
                continue;
            }
            let frac = overlap as f64 / op_dur as f64;
            seg.ops += frac;
            seg.bytes += op.bytes as f64 * frac;
            seg.objects += op.object_count as f64 * frac;
            if op.start >= seg.start && op.end <= seg_end {
                seg.full_ops += 1;
            }
        }
    }
    segments
}

/// Sort key for picking fastest/median/slowest windows: bytes/sec when the
/// log moved bytes, operations/sec otherwise.
pub fn sort_segments_by_throughput(segments: &mut [Segment], by_bytes: bool) {
    if by_bytes {
        segments.sort_by(|a, b| a.bps().partial_cmp(&b.bps()).unwrap_or(std::cmp::Ordering::Equal));
    } else {
        segments.sort_by(|a, b| {
            a.ops_per_sec()
                .partial_cmp(&b.ops_per_sec())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::testutil::op;
    use crate::record::OpType;

    #[test]
    fn test_segment_count_is_ceil() {
        let ops = Operations(vec![op(OpType::Get, 0, 0, 2500, 1000)]);
        let (from, to) = ops.time_range().unwrap();
        let segs = segment_log(&ops, from, to, Duration::from_secs(1));
        assert_eq!(segs.len(), 3); // ceil(2.5s / 1s)
    }

    #[test]
    fn test_fractional_attribution_conserves_totals() {
        // One 2s op spanning two 1s windows: each gets half the bytes.
        let ops = Operations(vec![op(OpType::Get, 0, 0, 2000, 1000)]);
        let (from, to) = ops.time_range().unwrap();
        let segs = segment_log(&ops, from, to, Duration::from_secs(1));
        assert_eq!(segs.len(), 2);
        assert!((segs[0].bytes - 500.0).abs() < 1e-6);
        assert!((segs[1].bytes - 500.0).abs() < 1e-6);
        let total: f64 = segs.iter().map(|s| s.bytes).sum();
        assert!((total - 1000.0).abs() < 1e-6);
        let ops_total: f64 = segs.iter().map(|s| s.ops).sum();
        assert!((ops_total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_full_ops_only_counts_contained() {
        let ops = Operations(vec![
            op(OpType::Get, 0, 100, 200, 10),  // inside window 0
            op(OpType::Get, 1, 900, 200, 10),  // straddles the boundary
            op(OpType::Get, 2, 1200, 100, 10), // inside window 1
        ]);
        let (from, _) = ops.time_range().unwrap();
        let to = from + chrono::Duration::seconds(2);
        let segs = segment_log(&ops, from, to, Duration::from_secs(1));
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].full_ops, 1);
        assert_eq!(segs[1].full_ops, 1);
        assert_eq!(segs.iter().map(|s| s.full_ops).sum::<u64>(), 2);
    }

    #[test]
    fn test_default_segment_duration_ladder() {
        assert_eq!(default_segment_duration(Duration::ZERO), Duration::ZERO);
        assert_eq!(
            default_segment_duration(Duration::from_secs(120)),
            Duration::from_secs(1)
        );
        assert_eq!(
            default_segment_duration(Duration::from_secs(30 * 60)),
            Duration::from_secs(5)
        );
        // 2 days fits 400 windows only at the 15-minute rung.
        assert_eq!(
            default_segment_duration(Duration::from_secs(48 * 3600)),
            Duration::from_secs(15 * 60)
        );
    }
}
