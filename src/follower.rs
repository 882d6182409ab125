// src/follower.rs
//
// Follower role: a long-lived process listening for WebSocket connections
// from a coordinator, executing benchmark stages on its command.
//
// The stage machine is a pair of one-shot signals per stage: the coordinator
// fires "start" through `StartStage`, the local run task fires "done" when
// the stage body returns. `StageStatus` polls read the done side without
// touching the run itself. The active run lives in a single nullable slot
// behind a short-held lock; a standalone coordinator never reads it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::bench::{self, execute, null_logger, ClientPool, Common, RunPlan};
use crate::client::SharedClient;
use crate::codec;
use crate::config::{BenchOpts, ClientConfig};
use crate::generator::{PayloadSource, SizeSpec};
use crate::live::LiveStats;
use crate::protocol::{
    BenchmarkPayload, ClientReply, RequestOp, ServerInfo, ServerRequest, Stage, StageInfo,
    WS_PATH,
};
use crate::record::Operations;

/// Builds storage clients when a benchmark request arrives. Injected so the
/// follower itself never speaks the wire protocol of the store.
pub type ClientFactory =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<SharedClient>>> + Send + Sync>;

/// Test hook: simulated wall-clock skew in milliseconds, applied to every
/// timestamp this follower reports. Lets the clock-sanity handshake be
/// exercised on a single machine.
pub const ENV_CLOCK_SKEW_MS: &str = "S3SURGE_CLOCK_SKEW_MS";

pub fn follower_now() -> DateTime<Utc> {
    let now = Utc::now();
    match std::env::var(ENV_CLOCK_SKEW_MS)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
    {
        Some(skew_ms) => now + chrono::Duration::milliseconds(skew_ms),
        None => now,
    }
}

struct StageCell {
    start_tx: Mutex<Option<oneshot::Sender<DateTime<Utc>>>>,
    start_rx: Mutex<Option<oneshot::Receiver<DateTime<Utc>>>>,
    done: AtomicBool,
    err: Mutex<Option<String>>,
}

impl StageCell {
    fn new() -> StageCell {
        let (tx, rx) = oneshot::channel();
        StageCell {
            start_tx: Mutex::new(Some(tx)),
            start_rx: Mutex::new(Some(rx)),
            done: AtomicBool::new(false),
            err: Mutex::new(None),
        }
    }
}

/// One benchmark run driven over the wire.
pub struct ClientRun {
    stages: HashMap<Stage, StageCell>,
    results: Mutex<Option<Operations>>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl ClientRun {
    pub fn new() -> Arc<ClientRun> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Arc::new(ClientRun {
            stages: Stage::ALL.iter().map(|s| (*s, StageCell::new())).collect(),
            results: Mutex::new(None),
            cancel_tx,
            cancel_rx,
        })
    }

    /// Fire the one-shot start signal for a stage. Duplicate requests are
    /// ignored, matching at-least-once delivery from the coordinator.
    pub fn request_start(&self, stage: Stage, at: DateTime<Utc>) {
        if let Some(tx) = self.stages[&stage].start_tx.lock().take() {
            let _ = tx.send(at);
        }
    }

    /// Block until the coordinator starts `stage`; returns the shared
    /// wall-clock instant the stage body must begin at.
    pub async fn wait_for_stage(&self, stage: Stage) -> Option<DateTime<Utc>> {
        let rx = self.stages[&stage].start_rx.lock().take()?;
        let mut cancel = self.cancel_rx.clone();
        tokio::select! {
            at = rx => at.ok(),
            _ = cancel.changed() => None,
        }
    }

    pub fn stage_done(&self, stage: Stage, err: Option<String>) {
        let cell = &self.stages[&stage];
        if let Some(e) = err {
            error!("stage {stage} failed: {e}");
            *cell.err.lock() = Some(e);
        } else {
            info!("stage {stage} done");
        }
        cell.done.store(true, Ordering::Release);
    }

    pub fn status(&self, stage: Stage) -> StageInfo {
        let cell = &self.stages[&stage];
        StageInfo {
            finished: cell.done.load(Ordering::Acquire),
            err: cell.err.lock().clone(),
        }
    }

    pub fn set_results(&self, ops: Operations) {
        *self.results.lock() = Some(ops);
    }

    pub fn results(&self) -> Option<Operations> {
        self.results.lock().clone()
    }

    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel_rx.clone()
    }
}

/// The follower's single active-run slot.
#[derive(Clone, Default)]
pub struct FollowerState {
    active: Arc<Mutex<Option<Arc<ClientRun>>>>,
}

impl FollowerState {
    fn replace(&self, run: Arc<ClientRun>) {
        let previous = self.active.lock().replace(run);
        if let Some(prev) = previous {
            prev.cancel();
        }
    }

    fn get(&self) -> Option<Arc<ClientRun>> {
        self.active.lock().clone()
    }
}

/// A bound follower listener; split from `serve` so callers can learn the
/// actual address when binding port 0.
pub struct FollowerServer {
    listener: TcpListener,
    state: FollowerState,
    factory: ClientFactory,
}

impl FollowerServer {
    pub async fn bind(addr: SocketAddr, factory: ClientFactory) -> Result<FollowerServer> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("cannot listen on {addr}"))?;
        Ok(FollowerServer {
            listener,
            state: FollowerState::default(),
            factory,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept coordinator connections until the process is stopped.
    /// Connection handlers are owned by this future: dropping it tears every
    /// open connection down with it.
    pub async fn serve(self) -> Result<()> {
        info!(
            "follower listening on {}{WS_PATH}",
            self.listener.local_addr()?
        );
        let mut connections = tokio::task::JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    let state = self.state.clone();
                    let factory = Arc::clone(&self.factory);
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, state, factory).await {
                            warn!("connection from {peer} ended: {e:#}");
                        }
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
    }
}

/// Listen for coordinator connections until the process is stopped.
pub async fn run_follower(addr: SocketAddr, factory: ClientFactory) -> Result<()> {
    FollowerServer::bind(addr, factory).await?.serve().await
}

async fn handle_connection(
    stream: TcpStream,
    state: FollowerState,
    factory: ClientFactory,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        if req.uri().path() == WS_PATH {
            Ok(resp)
        } else {
            let mut not_found = ErrorResponse::new(Some("not found".to_string()));
            *not_found.status_mut() = tokio_tungstenite::tungstenite::http::StatusCode::NOT_FOUND;
            Err(not_found)
        }
    })
    .await
    .context("websocket handshake failed")?;
    let (mut tx, mut rx) = ws.split();

    // First frame is the coordinator's identity; echo our clock back.
    let first = loop {
        match rx.next().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(_)) | None => anyhow::bail!("connection closed before handshake"),
            Some(Err(e)) => return Err(e).context("handshake read"),
        }
    };
    let info: ServerInfo =
        serde_json::from_str(&first).context("malformed coordinator hello")?;
    match info.validate() {
        Ok(()) => {
            tx.send(reply_frame(&ClientReply::ok(follower_now()))?).await?;
        }
        Err(e) => {
            tx.send(reply_frame(&ClientReply::error(follower_now(), e.to_string()))?)
                .await?;
            return Ok(());
        }
    }
    info!("coordinator {} connected", info.id);

    while let Some(msg) = rx.next().await {
        let text = match msg? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let req: ServerRequest = match serde_json::from_str(&text) {
            Ok(req) => req,
            Err(e) => {
                tx.send(reply_frame(&ClientReply::error(
                    follower_now(),
                    format!("malformed frame: {e}"),
                ))?)
                .await?;
                continue;
            }
        };
        let reply = match req.op {
            RequestOp::Disconnect => break,
            RequestOp::Benchmark => handle_benchmark(req.benchmark, &state, &factory),
            RequestOp::StartStage => match (state.get(), req.stage) {
                (Some(run), Some(stage)) => {
                    run.request_start(stage, req.start_time.unwrap_or_else(follower_now));
                    ClientReply::ok(follower_now())
                }
                _ => ClientReply::error(follower_now(), "no active benchmark"),
            },
            RequestOp::StageStatus => match (state.get(), req.stage) {
                (Some(run), Some(stage)) => {
                    let mut reply = ClientReply::ok(follower_now());
                    reply.stage_info = Some(run.status(stage));
                    reply
                }
                _ => ClientReply::error(follower_now(), "no active benchmark"),
            },
            RequestOp::SendOps => match state.get().and_then(|run| run.results()) {
                Some(ops) => {
                    let mut reply = ClientReply::ok(follower_now());
                    reply.ops = Some(ops);
                    reply
                }
                None => ClientReply::error(follower_now(), "no results available"),
            },
        };
        tx.send(reply_frame(&reply)?).await?;
    }
    Ok(())
}

fn reply_frame(reply: &ClientReply) -> Result<Message> {
    Ok(Message::text(serde_json::to_string(reply)?))
}

fn handle_benchmark(
    payload: Option<BenchmarkPayload>,
    state: &FollowerState,
    factory: &ClientFactory,
) -> ClientReply {
    let Some(payload) = payload else {
        return ClientReply::error(follower_now(), "benchmark request without payload");
    };
    let opts = match BenchOpts::from_flag_map(&payload.command, &payload.flags) {
        Ok(opts) => opts,
        Err(e) => return ClientReply::error(follower_now(), e.to_string()),
    };
    let run = ClientRun::new();
    state.replace(Arc::clone(&run));

    let factory = Arc::clone(factory);
    tokio::spawn(async move {
        let clients = match factory().await {
            Ok(clients) => clients,
            Err(e) => {
                run.stage_done(Stage::Prepare, Some(format!("client setup: {e:#}")));
                return;
            }
        };
        let common = Common {
            pool: ClientPool::new(clients),
            concurrency: opts.concurrency,
            bucket: opts.bucket.clone(),
            region: ClientConfig::from_env().region,
            prefix: opts.prefix.clone(),
            payload: Arc::new(PayloadSource::new(SizeSpec::new(opts.obj_size, opts.rand_size))),
            clear: !opts.noclear,
            prepare_progress: None,
            live: Arc::new(LiveStats::new()),
            error_ln: null_logger(),
        };
        let benchmark = match bench::build(&opts, common) {
            Ok(b) => b,
            Err(e) => {
                run.stage_done(Stage::Prepare, Some(e.to_string()));
                return;
            }
        };
        run_client_benchmark(run, benchmark, opts).await;
    });

    ClientReply::ok(follower_now())
}

/// Execute the staged lifecycle of one remote-driven benchmark.
async fn run_client_benchmark(
    run: Arc<ClientRun>,
    mut benchmark: Box<dyn bench::Benchmark>,
    opts: BenchOpts,
) {
    let Some(_) = run.wait_for_stage(Stage::Prepare).await else {
        return;
    };
    info!("prepare starting");
    let prep_err = benchmark.prepare().await.err().map(|e| format!("{e:#}"));
    let failed = prep_err.is_some();
    run.stage_done(Stage::Prepare, prep_err);
    if failed {
        return;
    }

    let Some(start_at) = run.wait_for_stage(Stage::Benchmark).await else {
        return;
    };
    info!("benchmark starting at {start_at}");
    let plan = RunPlan {
        start_at,
        duration: opts.duration,
        // Only the coordinator decides when a distributed run ends.
        autoterm: None,
    };
    let outcome = execute(benchmark.as_mut(), plan, Some(run.cancel_receiver())).await;
    match outcome {
        Ok(outcome) => {
            let mut ops = outcome.ops;
            ops.sort_by_start_time();
            ops.set_client_id(&crate::rand_ascii(6));
            persist_follower_log(&ops, &opts);
            run.set_results(ops);
            run.stage_done(Stage::Benchmark, None);
        }
        Err(e) => {
            run.stage_done(Stage::Benchmark, Some(format!("{e:#}")));
            return;
        }
    }

    if run.wait_for_stage(Stage::Cleanup).await.is_none() {
        return;
    }
    if !opts.keep_data {
        benchmark.cleanup().await;
    }
    run.stage_done(Stage::Cleanup, None);
}

/// Keep a local copy of the log; the coordinator holds the canonical one.
fn persist_follower_log(ops: &Operations, opts: &BenchOpts) {
    let name = format!(
        "s3surge-{}-{}-{}.csv.zst",
        opts.command,
        Utc::now().format("%Y-%m-%d[%H%M%S]"),
        crate::rand_ascii(4),
    );
    let write = || -> Result<()> {
        let file = std::fs::File::create(&name)?;
        codec::write_csv_zst(ops, file, "")?;
        Ok(())
    };
    match write() {
        Ok(()) => info!("benchmark data written to {name:?}"),
        Err(e) => warn!("cannot write benchmark data: {e:#}"),
    }
}
