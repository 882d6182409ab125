// End-to-end engine tests against the in-memory storage client: full
// prepare/start/cleanup lifecycle, record invariants, and the
// serialize-then-aggregate roundtrip.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use s3surge::aggregate::{aggregate, segment_log, AnalysisOpts};
use s3surge::bench::{self, Benchmark, ClientPool, Common, RunPlan};
use s3surge::client::memory::InMemoryClient;
use s3surge::client::SharedClient;
use s3surge::codec;
use s3surge::generator::{PayloadSource, SizeSpec};
use s3surge::live::LiveStats;
use s3surge::record::OpType;

fn memory_common(concurrency: usize) -> Common {
    let client: SharedClient = Arc::new(InMemoryClient::new());
    Common {
        pool: ClientPool::new(vec![client]),
        concurrency,
        bucket: "bench".to_string(),
        region: String::new(),
        prefix: "surge-test".to_string(),
        payload: Arc::new(PayloadSource::new(SizeSpec::new(4096, false))),
        clear: true,
        prepare_progress: None,
        live: Arc::new(LiveStats::new()),
        error_ln: bench::null_logger(),
    }
}

async fn run_get(concurrency: usize, objects: usize, secs: u64) -> s3surge::record::Operations {
    let mut b = bench::get::Get::new(memory_common(concurrency), objects, false);
    b.prepare().await.expect("prepare");
    let plan = RunPlan {
        start_at: Utc::now() + chrono::Duration::milliseconds(50),
        duration: Duration::from_secs(secs),
        autoterm: None,
    };
    let outcome = bench::execute(&mut b, plan, None).await.expect("run");
    assert!(!outcome.auto_terminated);
    let mut ops = outcome.ops;
    ops.sort_by_start_time();
    ops.set_client_id("test");
    b.cleanup().await;
    ops
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_host_get_two_segments() {
    // 10 prepopulated objects, 4 workers, 2s window, 1s segments.
    let ops = run_get(4, 10, 2).await;
    assert!(!ops.is_empty());
    assert_eq!(ops.n_errors(), 0);
    assert_eq!(ops.endpoints().len(), 1);
    assert_eq!(ops.threads(), 4);

    let agg = aggregate(
        &ops,
        &AnalysisOpts {
            segment_dur: Some(Duration::from_secs(1)),
            ..Default::default()
        },
    );
    assert_eq!(agg.operations.len(), 1);
    let get = &agg.operations[0];
    assert_eq!(get.op_type, OpType::Get);
    assert_eq!(get.errors, 0);
    assert_eq!(get.hosts, 1);
    assert!(get.throughput.average_ops > 0.0);

    let (from, to) = ops.active_time_range(true).unwrap();
    let segments = segment_log(&ops, from, to, Duration::from_secs(1));
    assert_eq!(
        segments.len(),
        ((to - from).to_std().unwrap().as_secs_f64() / 1.0).ceil() as usize
    );
    assert!(segments.len() >= 2, "expected at least two 1s windows");
    for seg in &segments {
        assert!(seg.ops > 0.0, "every window should see operations");
        assert_eq!(seg.errors, 0);
    }

    let single = get.single_sized.as_ref().expect("uniform sizes");
    assert!(single.stats.median_ms > 0.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_per_thread_records_monotonic() {
    let ops = run_get(8, 5, 1).await;
    ops.check_thread_monotonic()
        .expect("per-(client, thread) starts must be strictly increasing");
    for op in ops.iter() {
        assert!(op.end >= op.start, "no record may end before it starts");
        if let Some(fb) = op.first_byte {
            assert!(fb >= op.start && fb <= op.end);
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_aggregate_survives_serialization_roundtrip() {
    let ops = run_get(4, 10, 1).await;
    let mut buf = Vec::new();
    codec::write_csv_zst(&ops, &mut buf, "engine test").expect("encode");
    let back = codec::read_csv_zst(&buf[..], 0, 0, |_| {}).expect("decode");
    assert_eq!(back.len(), ops.len());

    let opts = AnalysisOpts {
        segment_dur: Some(Duration::from_secs(1)),
        ..Default::default()
    };
    let a = aggregate(&ops, &opts);
    let b = aggregate(&back, &opts);
    assert_eq!(a.operations.len(), b.operations.len());
    for (x, y) in a.operations.iter().zip(b.operations.iter()) {
        assert_eq!(x.n, y.n);
        assert_eq!(x.errors, y.errors);
        assert!((x.throughput.average_bps - y.throughput.average_bps).abs() <= 1e-9);
        assert!((x.throughput.average_ops - y.throughput.average_ops).abs() <= 1e-9);
        let (sx, sy) = (x.single_sized.as_ref().unwrap(), y.single_sized.as_ref().unwrap());
        assert!((sx.stats.median_ms - sy.stats.median_ms).abs() <= 1e-9);
        assert!((sx.stats.p99_ms - sy.stats.p99_ms).abs() <= 1e-9);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_delete_drains_pool() {
    let common = memory_common(4);
    let mut b = bench::delete::Delete::new(common, 40, 7);
    b.prepare().await.expect("prepare");
    let plan = RunPlan {
        start_at: Utc::now(),
        duration: Duration::from_secs(5),
        autoterm: None,
    };
    let outcome = bench::execute(&mut b, plan, None).await.expect("run");
    let ops = outcome.ops;
    // The pool is exhausted long before the deadline; all 40 objects are
    // deleted across batched requests of up to 7.
    let total_objects: u64 = ops.iter().map(|o| o.object_count as u64).sum();
    assert_eq!(total_objects, 40);
    assert!(ops.iter().all(|o| o.object_count <= 7));
    assert_eq!(ops.n_errors(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mixed_records_multiple_op_types() {
    let common = memory_common(4);
    let dist = s3surge::distribution::MixedDistribution::generate(
        std::collections::BTreeMap::from([
            (OpType::Get, 45.0),
            (OpType::Stat, 30.0),
            (OpType::Put, 15.0),
            (OpType::Delete, 10.0),
        ]),
        200,
        1,
    )
    .unwrap();
    let mut b = bench::mixed::Mixed::new(common, 50, dist);
    b.prepare().await.expect("prepare");
    let plan = RunPlan {
        start_at: Utc::now(),
        duration: Duration::from_secs(1),
        autoterm: None,
    };
    let ops = bench::execute(&mut b, plan, None).await.expect("run").ops;
    assert!(ops.is_mixed(), "mixed run must record several op types");

    let agg = aggregate(&ops, &AnalysisOpts::default());
    assert!(agg.mixed);
    let stats = agg.mixed_server_stats.expect("mixed server stats");
    let total: u64 = agg.operations.iter().map(|o| o.throughput.operations).sum();
    assert_eq!(stats.operations, total);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cleanup_removes_artifacts() {
    let client = Arc::new(InMemoryClient::new());
    let shared: SharedClient = Arc::clone(&client) as SharedClient;
    let mut common = memory_common(2);
    common.pool = ClientPool::new(vec![shared]);
    let mut b = bench::get::Get::new(common, 10, false);
    b.prepare().await.expect("prepare");
    assert_eq!(client.object_count("bench"), 10);
    b.cleanup().await;
    assert_eq!(client.object_count("bench"), 0);
}
