// Coordinator/follower protocol tests over loopback WebSocket connections,
// with followers serving the in-memory storage client.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use s3surge::bench::{null_logger, LogLn};
use s3surge::client::memory::InMemoryClient;
use s3surge::client::SharedClient;
use s3surge::config::BenchOpts;
use s3surge::coordinator::{self, Connections};
use s3surge::follower::{ClientFactory, FollowerServer};
use s3surge::protocol::{BenchmarkPayload, ServerRequest, Stage};

fn memory_factory() -> ClientFactory {
    Arc::new(|| {
        Box::pin(async {
            let client: SharedClient = Arc::new(InMemoryClient::new());
            Ok(vec![client])
        })
    })
}

fn loggers() -> (LogLn, LogLn) {
    (null_logger(), null_logger())
}

/// Bind a follower on an ephemeral port; returns its address and the serve
/// task (abort it to simulate a dying follower).
async fn spawn_follower() -> (String, tokio::task::JoinHandle<()>) {
    let server = FollowerServer::bind("127.0.0.1:0".parse().unwrap(), memory_factory())
        .await
        .expect("bind follower");
    let addr = server.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let _ = server.serve().await;
    });
    (addr.to_string(), task)
}

fn wire_opts(duration_secs: u64) -> BenchOpts {
    let mut opts = BenchOpts::new("get");
    opts.duration = Duration::from_secs(duration_secs);
    opts.concurrency = 2;
    opts.objects = 10;
    opts.obj_size = 1024;
    opts
}

fn benchmark_request(opts: &BenchOpts) -> ServerRequest {
    ServerRequest::benchmark(BenchmarkPayload {
        command: opts.command.clone(),
        args: Vec::new(),
        flags: opts.to_flag_map(),
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn test_handshake_and_disconnect() {
    let (addr, task) = spawn_follower().await;
    let (info_ln, error_ln) = loggers();
    let mut conns = Connections::new(vec![addr], info_ln, error_ln);
    conns.connect_all().await.expect("handshake");
    assert_eq!(conns.live(), 1);
    conns.close_all().await;
    task.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_full_remote_run_two_followers() {
    let (addr_a, task_a) = spawn_follower().await;
    let (addr_b, task_b) = spawn_follower().await;
    let (info_ln, error_ln) = loggers();
    let mut conns = Connections::new(vec![addr_a, addr_b], info_ln, error_ln);

    let opts = wire_opts(1);
    let ops = coordinator::run_remote(&mut conns, benchmark_request(&opts))
        .await
        .expect("remote run");

    assert!(!ops.is_empty());
    // Two followers, two workers each: four globally distinct thread ids.
    let threads: std::collections::BTreeSet<u16> =
        ops.iter().map(|o| o.thread_id).collect();
    assert_eq!(threads.len(), 4);
    // Each follower stamped its own client id.
    let clients: std::collections::BTreeSet<&str> =
        ops.iter().map(|o| o.client_id.as_str()).collect();
    assert_eq!(clients.len(), 2);
    ops.check_thread_monotonic().expect("per-thread ordering");
    // Sorted by start after collection.
    for pair in ops.0.windows(2) {
        assert!(pair[0].start <= pair[1].start);
    }

    task_a.abort();
    task_b.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_follower_lost_mid_benchmark_drops_partial_results() {
    let (addr_a, task_a) = spawn_follower().await;
    let (addr_b, task_b) = spawn_follower().await;
    let (info_ln, error_ln) = loggers();
    let mut conns = Connections::new(vec![addr_a, addr_b], info_ln, error_ln);
    conns.connect_all().await.expect("handshake");

    let opts = wire_opts(4);
    conns
        .send_benchmark(&benchmark_request(&opts))
        .await
        .expect("send benchmark");
    conns
        .start_stage_all(Stage::Prepare, Utc::now(), true)
        .await
        .expect("prepare start");
    conns.wait_for_stage(Stage::Prepare, true).await.expect("prepare");

    let start_at = Utc::now() + chrono::Duration::seconds(1);
    conns
        .start_stage_all(Stage::Benchmark, start_at, false)
        .await
        .expect("benchmark start");

    // Follower B dies one second into the benchmark window.
    tokio::time::sleep(Duration::from_secs(2)).await;
    task_b.abort();

    conns
        .wait_for_stage(Stage::Benchmark, false)
        .await
        .expect("survivors continue");
    assert_eq!(conns.live(), 1, "lost follower must be dropped");

    let logs = conns.download_ops().await;
    assert_eq!(logs.len(), 1, "only the survivor's results are collected");
    let survivor = &logs[0];
    assert!(!survivor.is_empty());
    // Only A's thread id range is present.
    let threads: std::collections::BTreeSet<u16> =
        survivor.iter().map(|o| o.thread_id).collect();
    assert_eq!(threads.len(), 2);

    conns.close_all().await;
    task_a.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_benchmark_payload_rejected_on_delivery() {
    // A benchmark whose flag map fails reconstruction is rejected on
    // delivery, before any stage starts.
    let (addr, task) = spawn_follower().await;
    let (info_ln, error_ln) = loggers();
    let mut conns = Connections::new(vec![addr], info_ln, error_ln);
    conns.connect_all().await.expect("handshake");

    let mut flags = wire_opts(1).to_flag_map();
    flags.insert("duration".into(), "not-a-duration".into());
    let req = ServerRequest::benchmark(BenchmarkPayload {
        command: "get".into(),
        args: Vec::new(),
        flags,
    });
    let err = conns.send_benchmark(&req).await.expect_err("must reject");
    assert!(err.to_string().contains("error"), "got: {err:#}");

    conns.close_all().await;
    task.abort();
}
