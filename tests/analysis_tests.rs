// File-level analysis workflows: merge, compare, and the decoder's
// offset/limit window, all over synthetic logs written to disk.

use std::fs::File;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use s3surge::aggregate::{aggregate, AnalysisOpts};
use s3surge::codec::{read_csv_zst, write_csv_zst};
use s3surge::compare::{compare, merge_logs, CompareError};
use s3surge::record::{OpType, Operation, Operations};

/// Uniform GET log: `threads` workers, 100ms ops back to back for `secs`,
/// each moving `bytes_per_op`.
fn synthetic_log(threads: u16, secs: i64, bytes_per_op: u64, client: &str) -> Operations {
    let base = Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap();
    let mut ops = Operations::new();
    for thread in 0..threads {
        for i in 0..(secs * 10) {
            let start = base + chrono::Duration::milliseconds(i * 100);
            let end = start + chrono::Duration::milliseconds(100);
            ops.push(Operation {
                op_type: OpType::Get,
                client_id: client.to_string(),
                thread_id: thread,
                endpoint: "127.0.0.1:9000".to_string(),
                object_count: 1,
                bytes: bytes_per_op,
                file: Some(format!("{client}-{thread}-{i}")),
                error: None,
                start,
                first_byte: Some(start + chrono::Duration::milliseconds(30)),
                end,
            });
        }
    }
    ops
}

fn write_log(dir: &TempDir, name: &str, ops: &Operations) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let file = File::create(&path).unwrap();
    write_csv_zst(ops, file, "synthetic").unwrap();
    path
}

fn read_log(path: &std::path::Path) -> Operations {
    read_csv_zst(File::open(path).unwrap(), 0, 0, |_| {}).unwrap()
}

#[test]
fn test_merge_three_files_end_to_end() {
    let dir = TempDir::new().unwrap();
    // Thread ranges [0..9], [0..4], [0..19].
    let a = synthetic_log(10, 2, 1000, "a");
    let b = synthetic_log(5, 2, 1000, "b");
    let c = synthetic_log(20, 2, 1000, "c");
    let (n_a, n_b, n_c) = (a.len() as u64, b.len() as u64, c.len() as u64);
    let paths = [
        write_log(&dir, "a.csv.zst", &a),
        write_log(&dir, "b.csv.zst", &b),
        write_log(&dir, "c.csv.zst", &c),
    ];

    let logs: Vec<Operations> = paths.iter().map(|p| read_log(p)).collect();
    let (merged, warnings) = merge_logs(logs);
    assert!(warnings.is_empty(), "ranges overlap: {warnings:?}");

    // Distinct ids across the union.
    let ids: std::collections::BTreeSet<(String, u16)> = merged
        .iter()
        .map(|o| (o.client_id.clone(), o.thread_id))
        .collect();
    assert_eq!(ids.len(), 35);
    let threads: std::collections::BTreeSet<u16> = merged.iter().map(|o| o.thread_id).collect();
    assert_eq!(threads.len(), 35, "thread ids must be globally unique");

    // Ordered by start.
    for pair in merged.0.windows(2) {
        assert!(pair[0].start <= pair[1].start);
    }

    // Aggregation over the union sums the per-op counts.
    let merged_path = write_log(&dir, "merged.csv.zst", &merged);
    let reread = read_log(&merged_path);
    let agg = aggregate(&reread, &AnalysisOpts::default());
    assert_eq!(agg.operations.len(), 1);
    assert_eq!(agg.operations[0].n, n_a + n_b + n_c);
}

#[test]
fn test_compare_runs_thirty_percent_apart() {
    // Run X moves 100 units/op, run Y 130 units/op over identical windows.
    let x = synthetic_log(4, 4, 100 << 20, "x");
    let y = synthetic_log(4, 4, 130 << 20, "y");
    let cmps = compare(&x, &y, Some(Duration::from_secs(1))).unwrap();
    assert_eq!(cmps.len(), 1);
    let c = &cmps[0];
    assert!((c.average_bps.percent() - 30.0).abs() < 0.1, "got {}", c.average_bps.percent());
    assert_eq!(c.threads.percent(), 0.0);
    assert_eq!(c.hosts.percent(), 0.0);
    let ttfb = c.ttfb_mean_ms.expect("both runs carry first-byte times");
    assert!((ttfb.0.percent()).abs() < 0.1, "unchanged ttfb");
}

#[test]
fn test_compare_mixed_against_single_fails() {
    let single = synthetic_log(2, 2, 1000, "s");
    let mut mixed = synthetic_log(2, 2, 1000, "m");
    let mut put = mixed.0[0].clone();
    put.op_type = OpType::Put;
    put.start += chrono::Duration::milliseconds(11);
    put.end += chrono::Duration::milliseconds(11);
    mixed.push(put);
    match compare(&single, &mixed, None) {
        Err(CompareError::IncomparableRuns) => {}
        other => panic!("expected IncomparableRuns, got {other:?}"),
    }
}

#[test]
fn test_decoder_offset_limit_window() {
    let dir = TempDir::new().unwrap();
    let ops = synthetic_log(1, 3, 512, "w");
    let path = write_log(&dir, "win.csv.zst", &ops);

    let limited = read_csv_zst(File::open(&path).unwrap(), 5, 10, |_| {}).unwrap();
    assert_eq!(limited.len(), 10);

    // limit 0 stays "unlimited".
    let unlimited = read_csv_zst(File::open(&path).unwrap(), 0, 0, |_| {}).unwrap();
    assert_eq!(unlimited.len(), ops.len());

    // Offset past the end yields an empty log, not an error.
    let empty = read_csv_zst(File::open(&path).unwrap(), 10_000, 0, |_| {}).unwrap();
    assert!(empty.is_empty());
}

#[test]
fn test_first_access_statistics_distinct_from_steady_state() {
    // Touch each of 5 files twice: first access slow, second fast.
    let base = Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap();
    let mut ops = Operations::new();
    for i in 0..5i64 {
        for (pass, dur_ms) in [(0i64, 200i64), (1, 20)] {
            let start = base + chrono::Duration::milliseconds(i * 500 + pass * 5000);
            ops.push(Operation {
                op_type: OpType::Get,
                client_id: "c".into(),
                thread_id: 0,
                endpoint: "h:9000".into(),
                object_count: 1,
                bytes: 4096,
                file: Some(format!("obj-{i}")),
                error: None,
                start,
                first_byte: None,
                end: start + chrono::Duration::milliseconds(dur_ms),
            });
        }
    }
    let agg = aggregate(&ops, &AnalysisOpts::default());
    let single = agg.operations[0].single_sized.as_ref().unwrap();
    let fa = single.first_access.as_ref().expect("first-access stats");
    assert_eq!(fa.requests, 5);
    assert!(
        fa.average_ms > single.stats.average_ms,
        "cold accesses must be slower than the blended average"
    );
    assert!((fa.average_ms - 200.0).abs() < 1.0);
}
