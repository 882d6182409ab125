// src/aggregate/stats.rs
//
// Request-level statistics: exact order-statistic quantiles, latency and
// TTFB summaries, first-access summaries, and size-bucketed breakdowns.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::record::Operations;

/// Linear interpolation between adjacent order statistics of sorted data.
/// `q` in [0, 1]. Empty input yields 0.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            if lo == hi {
                sorted[lo]
            } else {
                sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
            }
        }
    }
}

/// Latency summary over a set of per-request durations, in milliseconds.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LatencyStats {
    pub requests: u64,
    pub average_ms: f64,
    pub fastest_ms: f64,
    pub median_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
    pub slowest_ms: f64,
}

impl LatencyStats {
    /// Compute from unsorted durations; None when empty.
    pub fn from_durations_ms(mut values: Vec<f64>) -> Option<LatencyStats> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let sum: f64 = values.iter().sum();
        Some(LatencyStats {
            requests: values.len() as u64,
            average_ms: sum / values.len() as f64,
            fastest_ms: values[0],
            median_ms: quantile(&values, 0.50),
            p90_ms: quantile(&values, 0.90),
            p99_ms: quantile(&values, 0.99),
            slowest_ms: values[values.len() - 1],
        })
    }
}

/// Durations of successful requests, milliseconds.
pub fn request_durations_ms(ops: &Operations) -> Vec<f64> {
    ops.iter()
        .filter(|op| !op.is_error())
        .map(|op| op.duration().as_secs_f64() * 1000.0)
        .collect()
}

/// Time-to-first-byte of requests that reported one, milliseconds.
pub fn ttfb_ms(ops: &Operations) -> Vec<f64> {
    ops.iter()
        .filter(|op| !op.is_error())
        .filter_map(|op| op.ttfb())
        .map(|d| d.as_secs_f64() * 1000.0)
        .collect()
}

/// Single-size request statistics: wall latency, optional TTFB, cold-cache
/// first-access latency, and a per-endpoint breakdown (hosts with a single
/// sample are omitted).
#[derive(Debug, Clone, Serialize)]
pub struct SingleSizedRequests {
    pub obj_size: u64,
    pub stats: LatencyStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttfb: Option<LatencyStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_access: Option<LatencyStats>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub by_host: BTreeMap<String, LatencyStats>,
}

pub fn single_sized(ops: &Operations) -> Option<SingleSizedRequests> {
    let stats = LatencyStats::from_durations_ms(request_durations_ms(ops))?;
    let obj_size = ops
        .iter()
        .find(|op| !op.is_error() && op.object_count > 0)
        .map(|op| op.bytes / op.object_count as u64)
        .unwrap_or(0);
    let ttfb = LatencyStats::from_durations_ms(ttfb_ms(ops));
    let first_access = {
        let fa = ops.first_accesses();
        if fa.is_empty() || fa.len() == ops.len() {
            None
        } else {
            LatencyStats::from_durations_ms(request_durations_ms(&fa))
        }
    };
    let mut by_host = BTreeMap::new();
    for host in ops.endpoints() {
        let host_ops = ops.filter_by_endpoint(&host);
        if host_ops.len() <= 1 {
            continue;
        }
        if let Some(stats) = LatencyStats::from_durations_ms(request_durations_ms(&host_ops)) {
            by_host.insert(host, stats);
        }
    }
    Some(SingleSizedRequests {
        obj_size,
        stats,
        ttfb,
        first_access,
        by_host,
    })
}

/// One power-of-two size class.
#[derive(Debug, Clone, Serialize)]
pub struct SizeBucket {
    pub min_size: u64,
    pub max_size: u64,
    pub requests: u64,
    pub avg_obj_size: u64,
    pub avg_duration_ms: f64,
    /// Per-request throughput quantiles, bytes/sec.
    pub bps_fastest: f64,
    pub bps_median: f64,
    pub bps_slowest: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiSizedRequests {
    pub requests: u64,
    pub avg_obj_size: u64,
    pub by_size: Vec<SizeBucket>,
}

fn pow2_floor(n: u64) -> u64 {
    if n == 0 {
        0
    } else {
        1u64 << (63 - n.leading_zeros())
    }
}

pub fn multi_sized(ops: &Operations) -> Option<MultiSizedRequests> {
    let mut grouped: BTreeMap<u64, Vec<(u64, f64)>> = BTreeMap::new();
    for op in ops.iter().filter(|op| !op.is_error() && op.object_count > 0) {
        let per_obj = op.bytes / op.object_count as u64;
        grouped
            .entry(pow2_floor(per_obj))
            .or_default()
            .push((op.bytes, op.duration().as_secs_f64()));
    }
    if grouped.is_empty() {
        return None;
    }
    let mut total_requests = 0u64;
    let mut total_bytes = 0u64;
    let mut by_size = Vec::with_capacity(grouped.len());
    for (floor, requests) in grouped {
        let n = requests.len() as u64;
        total_requests += n;
        let bytes: u64 = requests.iter().map(|(b, _)| *b).sum();
        total_bytes += bytes;
        let mut rates: Vec<f64> = requests
            .iter()
            .filter(|(_, secs)| *secs > 0.0)
            .map(|(b, secs)| *b as f64 / secs)
            .collect();
        rates.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let avg_dur: f64 =
            requests.iter().map(|(_, secs)| secs).sum::<f64>() / requests.len() as f64;
        by_size.push(SizeBucket {
            min_size: floor,
            max_size: if floor == 0 { 0 } else { floor * 2 - 1 },
            requests: n,
            avg_obj_size: bytes / n,
            avg_duration_ms: avg_dur * 1000.0,
            bps_fastest: rates.last().copied().unwrap_or(0.0),
            bps_median: quantile(&rates, 0.50),
            bps_slowest: rates.first().copied().unwrap_or(0.0),
        });
    }
    Some(MultiSizedRequests {
        requests: total_requests,
        avg_obj_size: total_bytes / total_requests.max(1),
        by_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::testutil::op;
    use crate::record::OpType;

    #[test]
    fn test_quantile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&v, 0.0), 1.0);
        assert_eq!(quantile(&v, 1.0), 4.0);
        assert!((quantile(&v, 0.5) - 2.5).abs() < 1e-12);
        assert!((quantile(&v, 0.25) - 1.75).abs() < 1e-12);
        assert_eq!(quantile(&[], 0.5), 0.0);
        assert_eq!(quantile(&[7.0], 0.9), 7.0);
    }

    #[test]
    fn test_latency_stats_ordering() {
        let values: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let s = LatencyStats::from_durations_ms(values).unwrap();
        assert!(s.fastest_ms <= s.median_ms);
        assert!(s.median_ms <= s.p90_ms);
        assert!(s.p90_ms <= s.p99_ms);
        assert!(s.p99_ms <= s.slowest_ms);
        assert_eq!(s.requests, 100);
        assert!((s.average_ms - 50.5).abs() < 1e-12);
    }

    #[test]
    fn test_pow2_floor() {
        assert_eq!(pow2_floor(0), 0);
        assert_eq!(pow2_floor(1), 1);
        assert_eq!(pow2_floor(1023), 512);
        assert_eq!(pow2_floor(1024), 1024);
        assert_eq!(pow2_floor(1025), 1024);
    }

    #[test]
    fn test_multi_sized_buckets() {
        let mut a = op(OpType::Get, 0, 0, 10, 1000); // 512-bucket
        a.object_count = 1;
        let b = op(OpType::Get, 0, 20, 10, 1000);
        let mut c = op(OpType::Get, 1, 5, 10, 5000); // 4096-bucket
        c.object_count = 1;
        let ops = Operations(vec![a, b, c]);
        let ms = multi_sized(&ops).unwrap();
        assert_eq!(ms.requests, 3);
        assert_eq!(ms.by_size.len(), 2);
        assert_eq!(ms.by_size[0].min_size, 512);
        assert_eq!(ms.by_size[0].requests, 2);
        assert_eq!(ms.by_size[1].min_size, 4096);
    }

    #[test]
    fn test_single_sized_by_host_omits_singletons() {
        let mut a = op(OpType::Get, 0, 0, 10, 1000);
        let mut b = op(OpType::Get, 0, 20, 10, 1000);
        let mut c = op(OpType::Get, 1, 40, 10, 1000);
        a.endpoint = "h1:9000".into();
        b.endpoint = "h1:9000".into();
        c.endpoint = "h2:9000".into();
        let ops = Operations(vec![a, b, c]);
        let ss = single_sized(&ops).unwrap();
        assert!(ss.by_host.contains_key("h1:9000"));
        assert!(!ss.by_host.contains_key("h2:9000"));
    }
}
