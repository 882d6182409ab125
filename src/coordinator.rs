// src/coordinator.rs
//
// Coordinator role: connects to a set of followers, checks their clocks,
// walks them through prepare -> benchmark -> cleanup on a shared start
// instant, and collects their operation logs.
//
// Failure policy: anything during prepare is fatal; a follower lost during
// the benchmark stage is dropped (its partial results are not collected)
// while the others continue; cleanup errors are logged only.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::info;

use crate::bench::LogLn;
use crate::protocol::{
    ClientReply, ProtocolError, ServerInfo, ServerRequest, Stage, DEFAULT_PORT, MAX_CLOCK_SKEW,
    PROTOCOL_VERSION, WS_PATH,
};
use crate::record::Operations;

const CONNECT_ATTEMPTS: usize = 4;
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connections to all followers of one run.
pub struct Connections {
    hosts: Vec<String>,
    conns: Vec<Option<WsStream>>,
    si: ServerInfo,
    info_ln: LogLn,
    error_ln: LogLn,
}

impl Connections {
    pub fn new(hosts: Vec<String>, info_ln: LogLn, error_ln: LogLn) -> Connections {
        let conns = hosts.iter().map(|_| None).collect();
        Connections {
            hosts,
            conns,
            si: ServerInfo {
                id: crate::rand_ascii(20),
                secret: None,
                version: PROTOCOL_VERSION,
            },
            info_ln,
            error_ln,
        }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Remaining live followers.
    pub fn live(&self) -> usize {
        self.conns.iter().filter(|c| c.is_some()).count()
    }

    fn addr(&self, i: usize) -> String {
        let host = &self.hosts[i];
        if host.contains(':') {
            host.clone()
        } else {
            format!("{host}:{DEFAULT_PORT}")
        }
    }

    /// Connect and handshake with follower `i`, checking protocol version
    /// and wall-clock skew.
    async fn connect(&mut self, i: usize) -> Result<()> {
        let addr = self.addr(i);
        let url = format!("ws://{addr}{WS_PATH}");
        let mut last_err = None;
        for attempt in 0..CONNECT_ATTEMPTS {
            if attempt > 0 {
                (self.error_ln)(&format!("connection to {addr} failed, retrying..."));
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            match self.try_connect(&url, &addr).await {
                Ok(ws) => {
                    self.conns[i] = Some(ws);
                    return Ok(());
                }
                Err(e) => last_err = Some(e),
            }
        }
        self.conns[i] = None;
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("connect failed")))
    }

    async fn try_connect(&self, url: &str, addr: &str) -> Result<WsStream> {
        (self.info_ln)(&format!("connecting to {url}"));
        let (mut ws, _) = connect_async(url)
            .await
            .with_context(|| format!("cannot reach follower at {addr}"))?;
        let sent = Utc::now();
        ws.send(Message::text(serde_json::to_string(&self.si)?)).await?;
        let reply = read_reply(&mut ws).await?;
        if let Some(err) = reply.err {
            bail!("follower {addr} rejected handshake: {err}");
        }
        // Half the roundtrip approximates the one-way delay; anything past
        // the bound means segments would not align across hosts.
        let now = Utc::now();
        let roundtrip = now - sent;
        let skew = now - (reply.time + roundtrip / 2);
        let skew_abs = skew.abs().to_std().unwrap_or_default();
        if skew_abs > MAX_CLOCK_SKEW {
            return Err(ProtocolError::ClockSkew {
                host: addr.to_string(),
                skew_ms: skew.num_milliseconds(),
                roundtrip_ms: roundtrip.num_milliseconds(),
            }
            .into());
        }
        Ok(ws)
    }

    /// Connect every follower; any failure is fatal.
    pub async fn connect_all(&mut self) -> Result<()> {
        for i in 0..self.hosts.len() {
            self.connect(i).await?;
        }
        Ok(())
    }

    /// Send one request and read one reply, reconnecting once on transport
    /// failure. `None` conns yield FollowerLost.
    async fn round_trip(&mut self, i: usize, req: &ServerRequest) -> Result<ClientReply> {
        if self.conns[i].is_none() {
            self.connect(i).await?;
        }
        let text = serde_json::to_string(req)?;
        let addr = self.addr(i);
        for attempt in 0..2 {
            let Some(ws) = self.conns[i].as_mut() else {
                return Err(ProtocolError::FollowerLost(addr.clone()).into());
            };
            let result = async {
                ws.send(Message::text(text.clone())).await?;
                read_reply(ws).await
            }
            .await;
            match result {
                Ok(reply) => return Ok(reply),
                Err(e) if attempt == 0 => {
                    (self.error_ln)(&format!("{addr}: {e:#}"));
                    self.conns[i] = None;
                    self.connect(i).await?;
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("round_trip retries exhausted");
    }

    /// Drop a follower mid-run; its partial results are abandoned.
    fn drop_follower(&mut self, i: usize, reason: &str) {
        (self.error_ln)(&format!(
            "follower lost: {} ({reason}); continuing without it",
            self.addr(i)
        ));
        self.conns[i] = None;
    }

    /// Forward the benchmark invocation to every follower.
    pub async fn send_benchmark(&mut self, req: &ServerRequest) -> Result<()> {
        for i in 0..self.hosts.len() {
            let reply = self
                .round_trip(i, req)
                .await
                .with_context(|| format!("cannot send benchmark to {}", self.addr(i)))?;
            if let Some(err) = reply.err {
                bail!("follower {} returned an error: {err}", self.addr(i));
            }
            (self.info_ln)(&format!("follower {} connected...", self.addr(i)));
        }
        (self.info_ln)("all followers connected...");
        Ok(())
    }

    /// Request a stage start at a shared absolute instant on every live
    /// follower.
    pub async fn start_stage_all(
        &mut self,
        stage: Stage,
        start_at: DateTime<Utc>,
        fail_on_err: bool,
    ) -> Result<()> {
        (self.info_ln)(&format!("requesting stage {stage} start..."));
        let req = ServerRequest::start_stage(stage, start_at);
        let mut first_err = None;
        for i in 0..self.hosts.len() {
            if self.conns[i].is_none() {
                continue;
            }
            let outcome = match self.round_trip(i, &req).await {
                Ok(reply) => match reply.err {
                    Some(err) => Err(anyhow::anyhow!(err)),
                    None => Ok(()),
                },
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                if fail_on_err {
                    return Err(e.context(format!("stage {stage} start on {}", self.addr(i))));
                }
                self.drop_follower(i, &format!("stage {stage} start failed: {e:#}"));
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) if self.live() == 0 => Err(e.context("all followers lost")),
            _ => Ok(()),
        }
    }

    /// Poll every live follower at 1 Hz until it reports the stage done.
    pub async fn wait_for_stage(&mut self, stage: Stage, fail_on_err: bool) -> Result<()> {
        let mut pending: Vec<usize> = (0..self.hosts.len())
            .filter(|i| self.conns[*i].is_some())
            .collect();
        while !pending.is_empty() {
            let mut still_pending = Vec::with_capacity(pending.len());
            for i in pending {
                match self.round_trip(i, &ServerRequest::stage_status(stage)).await {
                    Ok(reply) => {
                        if let Some(err) = reply.err.or(reply
                            .stage_info
                            .as_ref()
                            .and_then(|s| s.err.clone()))
                        {
                            if fail_on_err {
                                bail!("stage {stage} failed on {}: {err}", self.addr(i));
                            }
                            self.drop_follower(i, &err);
                            continue;
                        }
                        if reply.stage_info.map(|s| s.finished).unwrap_or(false) {
                            (self.info_ln)(&format!(
                                "follower {}: finished stage {stage}...",
                                self.addr(i)
                            ));
                        } else {
                            still_pending.push(i);
                        }
                    }
                    Err(e) => {
                        if fail_on_err {
                            return Err(e.context(format!(
                                "lost follower {} during stage {stage}",
                                self.addr(i)
                            )));
                        }
                        self.drop_follower(i, &format!("{e:#}"));
                    }
                }
            }
            pending = still_pending;
            if !pending.is_empty() {
                tokio::time::sleep(STATUS_POLL_INTERVAL).await;
            }
        }
        Ok(())
    }

    /// Collect the operations log from every surviving follower.
    pub async fn download_ops(&mut self) -> Vec<Operations> {
        (self.info_ln)("downloading operations...");
        let mut logs = Vec::new();
        for i in 0..self.hosts.len() {
            if self.conns[i].is_none() {
                continue;
            }
            match self.round_trip(i, &ServerRequest::send_ops()).await {
                Ok(reply) => match (reply.err, reply.ops) {
                    (None, Some(ops)) => {
                        (self.info_ln)(&format!("follower {}: operations received.", self.addr(i)));
                        logs.push(ops);
                    }
                    (err, _) => self.drop_follower(
                        i,
                        &err.unwrap_or_else(|| "no operations in reply".to_string()),
                    ),
                },
                Err(e) => self.drop_follower(i, &format!("{e:#}")),
            }
        }
        logs
    }

    /// Politely disconnect everyone.
    pub async fn close_all(&mut self) {
        let text = serde_json::to_string(&ServerRequest::disconnect()).expect("static frame");
        for conn in self.conns.iter_mut() {
            if let Some(mut ws) = conn.take() {
                let _ = ws.send(Message::text(text.clone())).await;
                let _ = ws.close(None).await;
            }
        }
    }
}

async fn read_reply(ws: &mut WsStream) -> Result<ClientReply> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text).context("malformed follower reply");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                bail!(ProtocolError::FollowerLost("connection closed".into()))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e).context("follower read"),
        }
    }
}

/// Delay between requesting the benchmark stage and its shared start
/// instant, giving every follower time to arm its gate.
pub const BENCHMARK_START_DELAY: Duration = Duration::from_secs(3);

/// Drive a full remote benchmark and return the combined, thread-offset,
/// start-sorted operations log.
pub async fn run_remote(
    conns: &mut Connections,
    benchmark: ServerRequest,
) -> Result<Operations> {
    conns.connect_all().await?;
    conns.send_benchmark(&benchmark).await?;

    conns
        .start_stage_all(Stage::Prepare, Utc::now() + chrono::Duration::seconds(1), true)
        .await
        .context("prepare start failed")?;
    conns
        .wait_for_stage(Stage::Prepare, true)
        .await
        .context("prepare failed")?;
    info!("all followers prepared");

    let start_at = Utc::now() + chrono::Duration::from_std(BENCHMARK_START_DELAY)?;
    conns.start_stage_all(Stage::Benchmark, start_at, false).await?;
    conns.wait_for_stage(Stage::Benchmark, false).await?;

    let downloaded = conns.download_ops().await;
    let mut all = Operations::new();
    let mut offset = 0u16;
    for mut ops in downloaded {
        offset = ops.offset_threads(offset);
        all.extend(ops);
    }
    all.sort_by_start_time();

    conns.start_stage_all(Stage::Cleanup, Utc::now(), false).await?;
    conns.wait_for_stage(Stage::Cleanup, false).await?;
    conns.close_all().await;

    Ok(all)
}
