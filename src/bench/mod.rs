// src/bench/mod.rs
//
// Benchmark execution engine: the driver capability set, the start gate and
// stop signal, the worker pool, and the shared prepare/cleanup helpers all
// drivers build on.
//
// Lifecycle: `prepare` brings the bucket to a known state, `start` blocks
// every worker on the start gate until the coordinator releases it, workers
// then issue operations until the stop signal fires. A worker that has a
// request in flight when the signal fires completes and records it; records
// are buffered per worker and merged by append when the pool drains.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use rand::distr::Alphanumeric;
use rand::Rng;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::warn;

use crate::autoterm::{AutoTermConfig, AutoTermDetector};
use crate::client::{ObjectRef, SharedClient, StorageError};
use crate::generator::PayloadSource;
use crate::live::LiveStats;
use crate::record::{OpType, Operation, Operations};

pub mod delete;
pub mod get;
pub mod list;
pub mod mixed;
pub mod put;
pub mod select;
pub mod stat;
pub mod versioned;

/// Concurrency used for prepare-phase uploads and cleanup deletes.
const PREPARE_CONCURRENCY: usize = 32;

/// Maximum keys per batched removal.
const DELETE_BATCH_MAX: usize = 1000;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("preparation failed: {0}")]
    PreparationFailed(String),
}

/// Injected line loggers; the engine never prints directly.
pub type LogLn = Arc<dyn Fn(&str) + Send + Sync>;

pub fn null_logger() -> LogLn {
    Arc::new(|_| {})
}

/// One-shot broadcast gate plus stop signal, cloned into every worker.
#[derive(Clone)]
pub struct RunSignals {
    start: watch::Receiver<bool>,
    stop: watch::Receiver<bool>,
}

impl RunSignals {
    /// Block until the coordinator releases the gate.
    pub async fn wait_start(&mut self) {
        while !*self.start.borrow() {
            if self.start.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    pub async fn wait_stop(&mut self) {
        while !*self.stop.borrow() {
            if self.stop.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Sender side of the run signals, held by the engine.
pub struct RunController {
    start_tx: watch::Sender<bool>,
    stop_tx: watch::Sender<bool>,
}

impl RunController {
    pub fn new() -> (RunController, RunSignals) {
        let (start_tx, start) = watch::channel(false);
        let (stop_tx, stop) = watch::channel(false);
        (RunController { start_tx, stop_tx }, RunSignals { start, stop })
    }

    pub fn release_start(&self) {
        let _ = self.start_tx.send(true);
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Round-robin over the configured endpoints.
#[derive(Clone)]
pub struct ClientPool {
    clients: Arc<Vec<SharedClient>>,
    next: Arc<AtomicUsize>,
}

impl ClientPool {
    pub fn new(clients: Vec<SharedClient>) -> ClientPool {
        assert!(!clients.is_empty(), "client pool requires at least one endpoint");
        ClientPool {
            clients: Arc::new(clients),
            next: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn pick(&self) -> SharedClient {
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        Arc::clone(&self.clients[i % self.clients.len()])
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.clients.iter().map(|c| c.endpoint()).collect()
    }
}

/// State shared by every driver.
#[derive(Clone)]
pub struct Common {
    pub pool: ClientPool,
    pub concurrency: usize,
    pub bucket: String,
    pub region: String,
    /// Key prefix all artifacts of this run live under.
    pub prefix: String,
    pub payload: Arc<PayloadSource>,
    /// False when the operator asked to keep the bucket contents (noclear).
    pub clear: bool,
    pub prepare_progress: Option<mpsc::Sender<f64>>,
    pub live: Arc<LiveStats>,
    pub error_ln: LogLn,
}

impl Common {
    /// Non-blocking fractional progress report, dropped when nobody listens.
    pub fn report_progress(&self, fraction: f64) {
        if let Some(tx) = &self.prepare_progress {
            let _ = tx.try_send(fraction.clamp(0.0, 1.0));
        }
    }
}

/// Driver capability set.
#[async_trait]
pub trait Benchmark: Send {
    fn common(&self) -> &Common;

    /// Short name used for file naming and reporting ("get", "mixed", ...).
    fn name(&self) -> &'static str;

    /// Idempotent; brings the bucket to a known state and creates any
    /// precondition objects. Persistent failure aborts the run.
    async fn prepare(&mut self) -> Result<()>;

    /// Launch `concurrency` workers behind the start gate and drive them
    /// until the stop signal. Per-operation errors are recorded, not fatal.
    async fn start(&mut self, signals: RunSignals) -> Result<Operations>;

    /// Best-effort deletion of benchmark artifacts.
    async fn cleanup(&mut self);
}

/// Per-worker record buffer. No shared writer: buffers are merged by append
/// once the pool drains.
pub struct Recorder {
    thread_id: u16,
    live: Arc<LiveStats>,
    ops: Operations,
}

impl Recorder {
    pub fn new(thread_id: u16, live: Arc<LiveStats>) -> Recorder {
        Recorder {
            thread_id,
            live,
            ops: Operations::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        op_type: OpType,
        endpoint: String,
        object_count: u32,
        bytes: u64,
        file: Option<String>,
        error: Option<String>,
        start: DateTime<Utc>,
        first_byte: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
    ) {
        let duration = (end - start).to_std().unwrap_or_default();
        self.live.record(duration, bytes, error.is_some());
        self.ops.push(Operation {
            op_type,
            client_id: String::new(),
            thread_id: self.thread_id,
            endpoint,
            object_count,
            bytes,
            file,
            error,
            start,
            first_byte,
            end,
        });
    }

    pub fn finish(self) -> Operations {
        self.ops
    }
}

/// Spawn `concurrency` workers and merge their buffers on completion.
pub async fn run_worker_pool<F, Fut>(concurrency: usize, make_worker: F) -> Result<Operations>
where
    F: Fn(u16) -> Fut,
    Fut: std::future::Future<Output = Operations> + Send + 'static,
{
    let mut handles = Vec::with_capacity(concurrency);
    for thread_id in 0..concurrency as u16 {
        handles.push(tokio::spawn(make_worker(thread_id)));
    }
    let mut all = Operations::new();
    for handle in handles {
        let ops = handle.await.context("worker task panicked")?;
        all.extend(ops);
    }
    Ok(all)
}

/// Random object key under the run prefix.
pub fn random_key<R: Rng>(rng: &mut R, prefix: &str) -> String {
    let name: String = rng
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("{prefix}/{name}.rnd")
}

#[derive(Debug, Clone)]
pub struct PreparedObject {
    pub key: String,
    pub size: u64,
    pub version_id: Option<String>,
}

/// Upload `count` precondition objects under random keys.
pub async fn upload_objects(common: &Common, count: usize) -> Result<Vec<PreparedObject>> {
    let keys = {
        let mut rng = rand::rng();
        (0..count).map(|_| random_key(&mut rng, &common.prefix)).collect()
    };
    upload_named(common, keys).await
}

/// Upload precondition objects with caller-chosen keys, bounded concurrency
/// and fractional progress as uploads land.
pub async fn upload_named(common: &Common, keys: Vec<String>) -> Result<Vec<PreparedObject>> {
    let count = keys.len();
    let client0 = common.pool.pick();
    client0
        .make_bucket(&common.bucket, &common.region)
        .await
        .map_err(|e| BenchError::PreparationFailed(e.to_string()))?;

    let sem = Arc::new(Semaphore::new(PREPARE_CONCURRENCY));
    let done = Arc::new(AtomicUsize::new(0));
    let mut futs = FuturesUnordered::new();
    for key in keys {
        let sem = Arc::clone(&sem);
        let pool = common.pool.clone();
        let payload = Arc::clone(&common.payload);
        let bucket = common.bucket.clone();
        let done = Arc::clone(&done);
        futs.push(tokio::spawn(async move {
            let _permit = sem.acquire_owned().await.expect("semaphore closed");
            let (size, data) = {
                let mut rng = rand::rng();
                let size = payload.object_size(&mut rng);
                (size, payload.payload(&mut rng, size))
            };
            let client = pool.pick();
            let put = client.put_object(&bucket, &key, &data).await?;
            done.fetch_add(1, Ordering::Relaxed);
            Ok::<PreparedObject, StorageError>(PreparedObject {
                key,
                size,
                version_id: put.version_id,
            })
        }));
    }

    let mut prepared = Vec::with_capacity(count);
    while let Some(joined) = futs.next().await {
        let obj = joined
            .context("prepare task panicked")?
            .map_err(|e| BenchError::PreparationFailed(e.to_string()))?;
        prepared.push(obj);
        common.report_progress(done.load(Ordering::Relaxed) as f64 / count as f64);
    }
    common.report_progress(1.0);
    Ok(prepared)
}

/// Delete everything under the run prefix. Failures are logged, never fatal.
pub async fn clear_prefix(common: &Common) {
    if !common.clear {
        return;
    }
    let client = common.pool.pick();
    let entries = match client.list_objects(&common.bucket, &common.prefix).await {
        Ok(entries) => entries,
        Err(e) => {
            (common.error_ln)(&format!("cleanup: list failed: {e}"));
            return;
        }
    };
    for chunk in entries.chunks(DELETE_BATCH_MAX) {
        let refs: Vec<ObjectRef> = chunk
            .iter()
            .map(|e| ObjectRef {
                key: e.key.clone(),
                version_id: None,
            })
            .collect();
        if let Err(e) = client.remove_objects(&common.bucket, &refs).await {
            warn!("cleanup: batch delete failed: {e}");
            (common.error_ln)(&format!("cleanup: batch delete failed: {e}"));
        }
    }
}

/// Construct the driver named by the invocation options.
pub fn build(opts: &crate::config::BenchOpts, common: Common) -> Result<Box<dyn Benchmark>> {
    use crate::distribution::MixedDistribution;

    let b: Box<dyn Benchmark> = match opts.command.as_str() {
        "get" => Box::new(get::Get::new(common, opts.objects, opts.range)),
        "put" => Box::new(put::Put::new(common)),
        "delete" => Box::new(delete::Delete::new(common, opts.objects, opts.batch)),
        "stat" => Box::new(stat::Stat::new(common, opts.objects)),
        "list" => Box::new(list::List::new(common, opts.objects)),
        "select" => Box::new(select::Select::new(common, opts.objects, opts.query.clone())),
        "mixed" => {
            let dist = MixedDistribution::generate(opts.weights(), opts.objects * 2, opts.seed)?;
            Box::new(mixed::Mixed::new(common, opts.objects, dist))
        }
        "versioned" => {
            let dist = MixedDistribution::generate(opts.weights(), opts.objects * 2, opts.seed)?;
            Box::new(versioned::Versioned::new(common, opts.objects, dist))
        }
        other => anyhow::bail!("unknown benchmark command {other:?}"),
    };
    Ok(b)
}

/// Timed execution plan for a local (single-host) run.
pub struct RunPlan {
    pub start_at: DateTime<Utc>,
    pub duration: Duration,
    pub autoterm: Option<AutoTermConfig>,
}

pub struct RunOutcome {
    pub ops: Operations,
    pub auto_terminated: bool,
}

/// Drive a prepared benchmark through gate release, deadline and optional
/// auto-termination. `external_cancel` lets a supervising protocol stop the
/// run early; like the deadline it is not a failure.
pub async fn execute(
    b: &mut dyn Benchmark,
    plan: RunPlan,
    external_cancel: Option<watch::Receiver<bool>>,
) -> Result<RunOutcome> {
    let (controller, signals) = RunController::new();
    let controller = Arc::new(controller);
    let auto_terminated = Arc::new(AtomicBool::new(false));

    let timer = {
        let controller = Arc::clone(&controller);
        let delay = (plan.start_at - Utc::now()).to_std().unwrap_or_default();
        let duration = plan.duration;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            controller.release_start();
            tokio::time::sleep(duration).await;
            controller.stop();
        })
    };

    let autoterm_task = plan.autoterm.map(|cfg| {
        let controller = Arc::clone(&controller);
        let live = Arc::clone(&b.common().live);
        let fired = Arc::clone(&auto_terminated);
        let delay = (plan.start_at - Utc::now()).to_std().unwrap_or_default();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut det = AutoTermDetector::new(cfg);
            let mut tick = tokio::time::interval(Duration::from_millis(250));
            loop {
                tick.tick().await;
                let (ops, bytes) = live.totals();
                if det.observe(std::time::Instant::now(), ops, bytes) {
                    fired.store(true, Ordering::Relaxed);
                    controller.stop();
                    return;
                }
            }
        })
    });

    let cancel_task = external_cancel.map(|mut cancel| {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            while !*cancel.borrow() {
                if cancel.changed().await.is_err() {
                    return;
                }
            }
            controller.stop();
        })
    });

    let ops = b.start(signals).await?;

    timer.abort();
    if let Some(t) = autoterm_task {
        t.abort();
    }
    if let Some(t) = cancel_task {
        t.abort();
    }

    Ok(RunOutcome {
        ops,
        auto_terminated: auto_terminated.load(Ordering::Relaxed),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gate_blocks_until_release() {
        let (controller, signals) = RunController::new();
        let mut s = signals.clone();
        let waited = tokio::spawn(async move {
            s.wait_start().await;
            Utc::now()
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let released_at = Utc::now();
        controller.release_start();
        let woke_at = waited.await.unwrap();
        assert!(woke_at >= released_at);
    }

    #[tokio::test]
    async fn test_stop_signal_reaches_all_clones() {
        let (controller, signals) = RunController::new();
        let mut workers = Vec::new();
        for _ in 0..4 {
            let mut s = signals.clone();
            workers.push(tokio::spawn(async move {
                s.wait_stop().await;
                true
            }));
        }
        controller.stop();
        for w in workers {
            assert!(w.await.unwrap());
        }
    }

    #[test]
    fn test_random_key_has_prefix() {
        let mut rng = rand::rng();
        let k = random_key(&mut rng, "surge-abc");
        assert!(k.starts_with("surge-abc/"));
        assert!(k.ends_with(".rnd"));
    }
}
