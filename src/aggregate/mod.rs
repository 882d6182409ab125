// src/aggregate/mod.rs
//
// Analysis engine: turns an unordered multi-client operations log into a
// structured report of throughput, windowed throughput, latency quantiles,
// per-endpoint and per-size breakdowns, and mixed-workload totals.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::record::{OpType, Operations};

pub mod segments;
pub mod stats;

pub use segments::{default_segment_duration, segment_log, Segment};
pub use stats::{
    multi_sized, single_sized, LatencyStats, MultiSizedRequests, SingleSizedRequests,
};

/// An op-type with fewer samples than this inside the active range is
/// reported but flagged as unreliable and left unsegmented.
const MIN_RELIABLE_SAMPLES: u64 = 10;

/// How many distinct error strings are kept for the report.
const FIRST_ERRORS_KEPT: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct AnalysisOpts {
    /// Input was already narrowed by host/op; use the plain time range
    /// instead of the all-threads active range.
    pub prefiltered: bool,
    /// Fixed segment width; None picks from the default ladder.
    pub segment_dur: Option<Duration>,
    /// Extra warm-up excluded from the start of the active range.
    pub skip: Duration,
}

impl Default for AnalysisOpts {
    fn default() -> Self {
        AnalysisOpts {
            prefiltered: false,
            segment_dur: None,
            skip: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Throughput {
    pub operations: u64,
    pub bytes: u64,
    pub errors: u64,
    pub average_bps: f64,
    pub average_ops: f64,
    pub measured_secs: f64,
    pub start_time: DateTime<Utc>,
}

impl Throughput {
    fn over(ops: &Operations, from: DateTime<Utc>, to: DateTime<Utc>) -> Throughput {
        let secs = (to - from).to_std().unwrap_or_default().as_secs_f64();
        let bytes = ops.total_bytes();
        let n = ops.len() as u64;
        Throughput {
            operations: n,
            bytes,
            errors: ops.n_errors(),
            average_bps: if secs > 0.0 { bytes as f64 / secs } else { 0.0 },
            average_ops: if secs > 0.0 { n as f64 / secs } else { 0.0 },
            measured_secs: secs,
            start_time: from,
        }
    }
}

/// One windowed observation for the fastest/median/slowest report.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentStat {
    pub start: DateTime<Utc>,
    pub bps: f64,
    pub ops_per_sec: f64,
}

impl From<&Segment> for SegmentStat {
    fn from(s: &Segment) -> SegmentStat {
        SegmentStat {
            start: s.start,
            bps: s.bps(),
            ops_per_sec: s.ops_per_sec(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentedThroughput {
    pub segment_secs: f64,
    /// "bps" when the log moved bytes, "ops" otherwise.
    pub sorted_by: &'static str,
    pub fastest: SegmentStat,
    pub median: SegmentStat,
    pub slowest: SegmentStat,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpAggregate {
    pub op_type: OpType,
    pub n: u64,
    pub objects_per_operation: u32,
    pub concurrency: usize,
    pub hosts: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub errors: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub first_errors: Vec<String>,
    /// Too few samples for reliable windowed statistics.
    pub skipped: bool,
    pub throughput: Throughput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segmented: Option<SegmentedThroughput>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub by_host: BTreeMap<String, Throughput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_sized: Option<SingleSizedRequests>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multi_sized: Option<MultiSizedRequests>,
}

/// Joint statistics for mixed runs: total operation rate over the common
/// active range plus each op-type's share of the total.
#[derive(Debug, Clone, Serialize)]
pub struct MixedServerStats {
    pub operations: u64,
    pub ops_per_sec: f64,
    /// Percentage of total operations per op-type.
    pub shares: BTreeMap<OpType, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Aggregated {
    pub mixed: bool,
    pub operations: Vec<OpAggregate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mixed_server_stats: Option<MixedServerStats>,
}

/// Build the full report.
///
/// The active range is computed once over the whole log so that in mixed
/// mode every op-type's windows tile the same interval.
pub fn aggregate(ops: &Operations, opts: &AnalysisOpts) -> Aggregated {
    let mixed = ops.is_mixed();
    let range = active_range(ops, opts);
    let Some((from, to)) = range else {
        return Aggregated {
            mixed,
            operations: Vec::new(),
            mixed_server_stats: None,
        };
    };

    let delta = opts
        .segment_dur
        .unwrap_or_else(|| default_segment_duration((to - from).to_std().unwrap_or_default()));

    let mut operations = Vec::new();
    let mut total_in_range = 0u64;
    for op_type in ops.op_types() {
        let sub = ops.filter_by_op(op_type);
        let in_range = sub.filter_inside_range(from, to);
        total_in_range += in_range.len() as u64;
        operations.push(aggregate_one(op_type, &sub, &in_range, from, to, delta));
    }

    let mixed_server_stats = if mixed {
        let secs = (to - from).to_std().unwrap_or_default().as_secs_f64();
        let shares = operations
            .iter()
            .map(|agg| {
                let pct = if total_in_range > 0 {
                    100.0 * agg.throughput.operations as f64 / total_in_range as f64
                } else {
                    0.0
                };
                (agg.op_type, pct)
            })
            .collect();
        Some(MixedServerStats {
            operations: total_in_range,
            ops_per_sec: if secs > 0.0 {
                total_in_range as f64 / secs
            } else {
                0.0
            },
            shares,
        })
    } else {
        None
    };

    Aggregated {
        mixed,
        operations,
        mixed_server_stats,
    }
}

fn active_range(ops: &Operations, opts: &AnalysisOpts) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let (mut from, to) = if opts.prefiltered {
        ops.time_range()?
    } else {
        ops.active_time_range(true)?
    };
    if !opts.skip.is_zero() {
        from += chrono::Duration::from_std(opts.skip).ok()?;
    }
    if from >= to {
        return None;
    }
    Some((from, to))
}

fn aggregate_one(
    op_type: OpType,
    all: &Operations,
    in_range: &Operations,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    delta: Duration,
) -> OpAggregate {
    let n = in_range.len() as u64;
    let skipped = n < MIN_RELIABLE_SAMPLES;
    let throughput = Throughput::over(in_range, from, to);

    let segmented = if skipped || delta.is_zero() {
        None
    } else {
        segmented_throughput(in_range, from, to, delta)
    };

    let mut by_host = BTreeMap::new();
    for host in in_range.endpoints() {
        let host_ops = in_range.filter_by_endpoint(&host);
        if host_ops.len() <= 1 {
            continue;
        }
        by_host.insert(host, Throughput::over(&host_ops, from, to));
    }

    let (single, multi) = if in_range.multiple_sizes() {
        (None, multi_sized(in_range))
    } else {
        (single_sized(in_range), None)
    };

    OpAggregate {
        op_type,
        n,
        objects_per_operation: all.first_obj_per_op(),
        concurrency: all.threads(),
        hosts: in_range.endpoints().len(),
        start_time: from,
        end_time: to,
        errors: in_range.n_errors(),
        first_errors: in_range.first_errors(FIRST_ERRORS_KEPT),
        skipped,
        throughput,
        segmented,
        by_host,
        single_sized: single,
        multi_sized: multi,
    }
}

fn segmented_throughput(
    ops: &Operations,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    delta: Duration,
) -> Option<SegmentedThroughput> {
    let all = segment_log(ops, from, to, delta);
    // Only whole windows are ranked; a trailing partial window would skew
    // the extremes.
    let delta_chrono = chrono::Duration::from_std(delta).ok()?;
    let mut whole: Vec<Segment> = all
        .into_iter()
        .filter(|s| s.start + delta_chrono <= to)
        .collect();
    if whole.is_empty() {
        return None;
    }
    let by_bytes = ops.total_bytes() > 0;
    segments::sort_segments_by_throughput(&mut whole, by_bytes);
    let slowest = SegmentStat::from(&whole[0]);
    let median = SegmentStat::from(&whole[whole.len() / 2]);
    let fastest = SegmentStat::from(&whole[whole.len() - 1]);
    Some(SegmentedThroughput {
        segment_secs: delta.as_secs_f64(),
        sorted_by: if by_bytes { "bps" } else { "ops" },
        fastest,
        median,
        slowest,
    })
}

/// Render a byte rate the way operators read it.
pub fn format_bps(bps: f64) -> String {
    const UNITS: [&str; 5] = ["B/s", "KiB/s", "MiB/s", "GiB/s", "TiB/s"];
    let mut v = bps;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    format!("{v:.2} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::testutil::op;

    /// Uniform single-op log: 2 threads, back-to-back 100ms ops for exactly
    /// 4s, 1 KiB each.
    fn uniform_log() -> Operations {
        let mut ops = Operations::new();
        for thread in 0..2u16 {
            for i in 0..40 {
                ops.push(op(OpType::Get, thread, i * 100, 100, 1024));
            }
        }
        ops
    }

    #[test]
    fn test_aggregate_single_op() {
        let ops = uniform_log();
        let agg = aggregate(
            &ops,
            &AnalysisOpts {
                segment_dur: Some(Duration::from_secs(1)),
                ..Default::default()
            },
        );
        assert!(!agg.mixed);
        assert!(agg.mixed_server_stats.is_none());
        assert_eq!(agg.operations.len(), 1);
        let g = &agg.operations[0];
        assert_eq!(g.op_type, OpType::Get);
        assert_eq!(g.concurrency, 2);
        assert_eq!(g.hosts, 1);
        assert_eq!(g.errors, 0);
        assert!(g.throughput.average_bps > 0.0);
        let seg = g.segmented.as_ref().expect("segmented stats");
        assert!(seg.fastest.bps >= seg.median.bps);
        assert!(seg.median.bps >= seg.slowest.bps);
        // Average lies between the slowest and fastest whole window.
        assert!(g.throughput.average_bps <= seg.fastest.bps + 1e-9);
        assert!(g.throughput.average_bps >= seg.slowest.bps - 1e-9);
    }

    #[test]
    fn test_aggregate_mixed_totals() {
        let mut ops = Operations::new();
        for thread in 0..2u16 {
            for i in 0..30 {
                let t = if i % 3 == 0 { OpType::Put } else { OpType::Get };
                ops.push(op(t, thread, i * 100, 80, 2048));
            }
        }
        let agg = aggregate(&ops, &AnalysisOpts::default());
        assert!(agg.mixed);
        let stats = agg.mixed_server_stats.expect("mixed stats");
        let total: u64 = agg.operations.iter().map(|o| o.throughput.operations).sum();
        assert_eq!(stats.operations, total);
        let share_sum: f64 = stats.shares.values().sum();
        assert!((share_sum - 100.0).abs() < 1e-6);
        // All op windows tile the same interval.
        let first = &agg.operations[0];
        for other in &agg.operations[1..] {
            assert_eq!(first.start_time, other.start_time);
            assert_eq!(first.end_time, other.end_time);
        }
    }

    #[test]
    fn test_skip_excludes_warmup() {
        let ops = uniform_log();
        let full = aggregate(&ops, &AnalysisOpts::default());
        let skipped = aggregate(
            &ops,
            &AnalysisOpts {
                skip: Duration::from_secs(1),
                ..Default::default()
            },
        );
        let a = full.operations[0].throughput.measured_secs;
        let b = skipped.operations[0].throughput.measured_secs;
        assert!(b < a);
        assert!((a - b - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_empty_log() {
        let agg = aggregate(&Operations::new(), &AnalysisOpts::default());
        assert!(agg.operations.is_empty());
    }

    #[test]
    fn test_format_bps() {
        assert_eq!(format_bps(512.0), "512.00 B/s");
        assert_eq!(format_bps(2048.0), "2.00 KiB/s");
        assert_eq!(format_bps(3.0 * 1024.0 * 1024.0), "3.00 MiB/s");
    }
}
