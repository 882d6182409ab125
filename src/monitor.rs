// src/monitor.rs
//
// Read-only live-status endpoint for external observers. Entirely optional:
// the operator opts in by binding an address, and nothing in the benchmark
// path ever blocks on it. The monitor holds no reference back into the
// benchmark; it is fed through the setters below.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info};

use crate::live::LiveStats;
use crate::record::Operations;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonitorStage {
    Preparing,
    Running,
    Done,
}

struct Inner {
    started: Instant,
    stage: Mutex<MonitorStage>,
    progress: Mutex<f64>,
    live: Mutex<Option<Arc<LiveStats>>>,
    ops: Mutex<Option<Arc<Operations>>>,
}

/// Shared handle; cheap to clone into the serving task.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

impl Monitor {
    pub fn new() -> Monitor {
        Monitor {
            inner: Arc::new(Inner {
                started: Instant::now(),
                stage: Mutex::new(MonitorStage::Preparing),
                progress: Mutex::new(0.0),
                live: Mutex::new(None),
                ops: Mutex::new(None),
            }),
        }
    }

    /// Serve `/v1/status` and `/v1/operations` on `addr` in the background.
    pub fn serve(&self, addr: SocketAddr) {
        let monitor = self.clone();
        tokio::spawn(async move {
            let app = Router::new()
                .route("/v1/status", get(status))
                .route("/v1/operations", get(operations))
                .with_state(monitor);
            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!("monitor cannot bind {addr}: {e}");
                    return;
                }
            };
            info!("monitor listening on http://{addr}/v1/status");
            if let Err(e) = axum::serve(listener, app).await {
                error!("monitor server stopped: {e}");
            }
        });
    }

    pub fn set_stage(&self, stage: MonitorStage) {
        *self.inner.stage.lock() = stage;
    }

    /// Last-known fractional progress of the current stage.
    pub fn set_progress(&self, fraction: f64) {
        *self.inner.progress.lock() = fraction.clamp(0.0, 1.0);
    }

    pub fn set_live(&self, live: Arc<LiveStats>) {
        *self.inner.live.lock() = Some(live);
    }

    /// Publish the finished log; flips the stage to Done.
    pub fn operations_ready(&self, ops: Operations) {
        *self.inner.ops.lock() = Some(Arc::new(ops));
        self.set_stage(MonitorStage::Done);
        self.set_progress(1.0);
    }

    fn status_body(&self) -> StatusBody {
        StatusBody {
            stage: *self.inner.stage.lock(),
            elapsed_secs: self.inner.started.elapsed().as_secs_f64(),
            progress: *self.inner.progress.lock(),
            live: self
                .inner
                .live
                .lock()
                .as_ref()
                .map(|l| l.snapshot()),
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct StatusBody {
    stage: MonitorStage,
    elapsed_secs: f64,
    progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    live: Option<crate::live::LiveSnapshot>,
}

async fn status(State(monitor): State<Monitor>) -> Json<StatusBody> {
    Json(monitor.status_body())
}

async fn operations(State(monitor): State<Monitor>) -> Result<Json<Operations>, StatusCode> {
    let ops = monitor.inner.ops.lock().clone();
    match ops {
        Some(ops) => Ok(Json((*ops).clone())),
        None => Err(StatusCode::NOT_FOUND),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_transitions() {
        let m = Monitor::new();
        assert_eq!(*m.inner.stage.lock(), MonitorStage::Preparing);
        m.set_stage(MonitorStage::Running);
        m.set_progress(0.5);
        let body = m.status_body();
        assert_eq!(body.stage, MonitorStage::Running);
        assert!((body.progress - 0.5).abs() < f64::EPSILON);
        m.operations_ready(Operations::new());
        assert_eq!(*m.inner.stage.lock(), MonitorStage::Done);
    }

    #[test]
    fn test_status_serializes() {
        let m = Monitor::new();
        let json = serde_json::to_value(m.status_body()).unwrap();
        assert_eq!(json["stage"], "Preparing");
        assert!(json.get("live").is_none());
    }
}
