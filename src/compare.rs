// src/compare.rs
//
// Comparing two benchmark runs and merging several logs into one.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::aggregate::{aggregate, format_bps, AnalysisOpts};
use crate::record::{OpType, Operations};

#[derive(Debug, Error)]
pub enum CompareError {
    #[error("incomparable runs: cannot compare a mixed run with a single-op run")]
    IncomparableRuns,
    #[error("no overlapping operation types between the runs")]
    NoCommonOps,
}

/// Relative change of one metric, before -> after.
#[derive(Debug, Clone, Copy)]
pub struct Delta {
    pub before: f64,
    pub after: f64,
}

impl Delta {
    pub fn percent(&self) -> f64 {
        if self.before == 0.0 {
            return 0.0;
        }
        100.0 * (self.after - self.before) / self.before
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({:+.1}%)",
            format_bps(self.before),
            format_bps(self.after),
            self.percent()
        )
    }
}

/// Millisecond-valued delta, printed without rate units.
#[derive(Debug, Clone, Copy)]
pub struct DeltaMs(pub Delta);

impl fmt::Display for DeltaMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2}ms -> {:.2}ms ({:+.1}%)",
            self.0.before,
            self.0.after,
            self.0.percent()
        )
    }
}

#[derive(Debug, Clone)]
pub struct Comparison {
    pub op_type: OpType,
    pub average_bps: Delta,
    pub median_bps: Option<Delta>,
    pub fastest_bps: Option<Delta>,
    pub slowest_bps: Option<Delta>,
    pub ttfb_mean_ms: Option<DeltaMs>,
    pub operations: Delta,
    pub threads: Delta,
    pub hosts: Delta,
}

/// Compare two runs op-type by op-type at the same segment width.
///
/// Both logs must agree on being mixed or single-op. The width is chosen
/// from `before` when the caller did not fix one; each run is aggregated
/// over its own active range.
pub fn compare(
    before: &Operations,
    after: &Operations,
    segment_dur: Option<Duration>,
) -> Result<Vec<Comparison>, CompareError> {
    if before.is_mixed() != after.is_mixed() {
        return Err(CompareError::IncomparableRuns);
    }
    let opts_before = AnalysisOpts {
        segment_dur,
        ..Default::default()
    };
    let agg_before = aggregate(before, &opts_before);
    // Reuse the width the before-run settled on so windows stay comparable.
    let settled = agg_before
        .operations
        .iter()
        .filter_map(|o| o.segmented.as_ref())
        .map(|s| Duration::from_secs_f64(s.segment_secs))
        .next();
    let agg_after = aggregate(
        after,
        &AnalysisOpts {
            segment_dur: segment_dur.or(settled),
            ..Default::default()
        },
    );

    let mut out = Vec::new();
    for b in &agg_before.operations {
        let Some(a) = agg_after.operations.iter().find(|a| a.op_type == b.op_type) else {
            continue;
        };
        let seg_delta = |f: fn(&crate::aggregate::SegmentedThroughput) -> f64| -> Option<Delta> {
            match (&b.segmented, &a.segmented) {
                (Some(sb), Some(sa)) => Some(Delta {
                    before: f(sb),
                    after: f(sa),
                }),
                _ => None,
            }
        };
        let ttfb_mean_ms = match (
            b.single_sized.as_ref().and_then(|s| s.ttfb.as_ref()),
            a.single_sized.as_ref().and_then(|s| s.ttfb.as_ref()),
        ) {
            (Some(tb), Some(ta)) => Some(DeltaMs(Delta {
                before: tb.average_ms,
                after: ta.average_ms,
            })),
            _ => None,
        };
        out.push(Comparison {
            op_type: b.op_type,
            average_bps: Delta {
                before: b.throughput.average_bps,
                after: a.throughput.average_bps,
            },
            median_bps: seg_delta(|s| s.median.bps),
            fastest_bps: seg_delta(|s| s.fastest.bps),
            slowest_bps: seg_delta(|s| s.slowest.bps),
            ttfb_mean_ms,
            operations: Delta {
                before: b.n as f64,
                after: a.n as f64,
            },
            threads: Delta {
                before: b.concurrency as f64,
                after: a.concurrency as f64,
            },
            hosts: Delta {
                before: b.hosts as f64,
                after: a.hosts as f64,
            },
        });
    }
    if out.is_empty() {
        return Err(CompareError::NoCommonOps);
    }
    Ok(out)
}

/// Concatenate several logs, keeping thread ids globally unique, and
/// stable-sort the union by start time. Returns per-op-type warnings for
/// types whose per-file ranges do not overlap.
pub fn merge_logs(logs: Vec<Operations>) -> (Operations, Vec<String>) {
    let mut all = Operations::new();
    let mut offset = 0u16;
    for mut log in logs {
        offset = log.offset_threads(offset);
        all.extend(log);
    }
    all.sort_by_start_time();

    let mut warnings = Vec::new();
    for (op_type, ops) in all.by_op() {
        if let Some((start, end)) = ops.active_time_range(true) {
            if start >= end {
                warnings.push(format!("no overlapping active range for {op_type}"));
            }
        }
    }
    (all, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::testutil::op;

    fn run_with_rate(bytes_per_op: u64) -> Operations {
        let mut ops = Operations::new();
        for thread in 0..2u16 {
            for i in 0..40 {
                ops.push(op(OpType::Get, thread, i * 100, 100, bytes_per_op));
            }
        }
        ops
    }

    #[test]
    fn test_compare_reports_relative_change() {
        let before = run_with_rate(1000);
        let after = run_with_rate(1300);
        let cmps = compare(&before, &after, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(cmps.len(), 1);
        let c = &cmps[0];
        assert_eq!(c.op_type, OpType::Get);
        assert!((c.average_bps.percent() - 30.0).abs() < 0.5);
        // Same thread and endpoint counts: no delta.
        assert_eq!(c.threads.percent(), 0.0);
        assert_eq!(c.hosts.percent(), 0.0);
    }

    #[test]
    fn test_compare_rejects_mixed_vs_single() {
        let single = run_with_rate(1000);
        let mut mixed = run_with_rate(1000);
        mixed.push(op(OpType::Put, 0, 4200, 50, 100));
        match compare(&single, &mixed, None) {
            Err(CompareError::IncomparableRuns) => {}
            other => panic!("expected IncomparableRuns, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_keeps_thread_ids_unique() {
        let a = Operations((0..10).map(|t| op(OpType::Get, t, t as i64 * 10, 5, 1)).collect());
        let b = Operations((0..5).map(|t| op(OpType::Get, t, t as i64 * 10 + 2, 5, 1)).collect());
        let c = Operations((0..20).map(|t| op(OpType::Get, t, t as i64 * 10 + 4, 5, 1)).collect());
        let (n_a, n_b, n_c) = (a.len(), b.len(), c.len());
        let (merged, _) = merge_logs(vec![a, b, c]);
        assert_eq!(merged.len(), n_a + n_b + n_c);
        let distinct: std::collections::BTreeSet<u16> =
            merged.iter().map(|o| o.thread_id).collect();
        assert_eq!(distinct.len(), 35);
        // Sorted by start after merge.
        for w in merged.0.windows(2) {
            assert!(w[0].start <= w[1].start);
        }
    }

    #[test]
    fn test_merged_aggregation_sums_counts() {
        let a = run_with_rate(100);
        let b = run_with_rate(100);
        let (total_a, total_b) = (a.len() as u64, b.len() as u64);
        let (merged, _) = merge_logs(vec![a, b]);
        let agg = aggregate(&merged, &AnalysisOpts::default());
        assert_eq!(agg.operations[0].n, total_a + total_b);
    }

    #[test]
    fn test_delta_display() {
        let d = Delta {
            before: 100.0 * 1024.0 * 1024.0,
            after: 130.0 * 1024.0 * 1024.0,
        };
        assert_eq!(d.to_string(), "100.00 MiB/s -> 130.00 MiB/s (+30.0%)");
    }
}
