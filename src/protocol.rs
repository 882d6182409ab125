// src/protocol.rs
//
// Wire frames exchanged between the coordinator and its followers. All
// frames are JSON objects carried in WebSocket text messages on path `/ws`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::Operations;

/// Single supported protocol version; the handshake rejects anything else.
pub const PROTOCOL_VERSION: u32 = 1;

/// Port followers listen on when none is given.
pub const DEFAULT_PORT: u16 = 7761;

/// WebSocket path the follower serves.
pub const WS_PATH: &str = "/ws";

/// Maximum tolerated wall-clock skew between coordinator and follower.
pub const MAX_CLOCK_SKEW: std::time::Duration = std::time::Duration::from_secs(1);

/// Flags that are never forwarded to followers: coordinator-only concerns
/// and anything that would make a follower recurse or rebind local outputs.
pub const EXCLUDED_FLAGS: [&str; 9] = [
    "warp-client",
    "warp-client-server",
    "serverprof",
    "autocompletion",
    "help",
    "syncstart",
    "analyze.out",
    "followers",
    "serve",
];

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("version mismatch: coordinator speaks v{coordinator}, follower v{follower}")]
    VersionMismatch { coordinator: u32, follower: u32 },
    #[error("clock skew {skew_ms}ms exceeds 1s (roundtrip {roundtrip_ms}ms); synchronize clocks on {host} and retry")]
    ClockSkew {
        host: String,
        skew_ms: i64,
        roundtrip_ms: i64,
    },
    #[error("follower lost: {0}")]
    FollowerLost(String),
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

/// First frame after connect, coordinator -> follower. The follower echoes
/// its own wall clock back in a `ClientReply` so skew can be estimated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub version: u32,
}

impl ServerInfo {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.id.is_empty() {
            return Err(ProtocolError::MalformedFrame("empty coordinator id".into()));
        }
        if self.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                coordinator: self.version,
                follower: PROTOCOL_VERSION,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOp {
    Disconnect,
    Benchmark,
    StartStage,
    StageStatus,
    SendOps,
}

/// Benchmark stages, driven strictly by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Prepare,
    Benchmark,
    Cleanup,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Prepare, Stage::Benchmark, Stage::Cleanup];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Prepare => "prepare",
            Stage::Benchmark => "benchmark",
            Stage::Cleanup => "cleanup",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The invocation a follower reconstructs its local configuration from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchmarkPayload {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub flags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRequest {
    pub op: RequestOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<BenchmarkPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
}

impl ServerRequest {
    pub fn disconnect() -> ServerRequest {
        ServerRequest {
            op: RequestOp::Disconnect,
            benchmark: None,
            stage: None,
            start_time: None,
        }
    }

    pub fn benchmark(payload: BenchmarkPayload) -> ServerRequest {
        ServerRequest {
            op: RequestOp::Benchmark,
            benchmark: Some(payload),
            stage: None,
            start_time: None,
        }
    }

    pub fn start_stage(stage: Stage, start_time: DateTime<Utc>) -> ServerRequest {
        ServerRequest {
            op: RequestOp::StartStage,
            benchmark: None,
            stage: Some(stage),
            start_time: Some(start_time),
        }
    }

    pub fn stage_status(stage: Stage) -> ServerRequest {
        ServerRequest {
            op: RequestOp::StageStatus,
            benchmark: None,
            stage: Some(stage),
            start_time: None,
        }
    }

    pub fn send_ops() -> ServerRequest {
        ServerRequest {
            op: RequestOp::SendOps,
            benchmark: None,
            stage: None,
            start_time: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageInfo {
    pub finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

/// Follower -> coordinator reply to any request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_info: Option<StageInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ops: Option<Operations>,
}

impl ClientReply {
    pub fn ok(time: DateTime<Utc>) -> ClientReply {
        ClientReply {
            err: None,
            time,
            stage_info: None,
            ops: None,
        }
    }

    pub fn error(time: DateTime<Utc>, err: impl Into<String>) -> ClientReply {
        ClientReply {
            err: Some(err.into()),
            time,
            stage_info: None,
            ops: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_info_validation() {
        let good = ServerInfo {
            id: "abc".into(),
            secret: None,
            version: PROTOCOL_VERSION,
        };
        assert!(good.validate().is_ok());

        let bad_version = ServerInfo {
            id: "abc".into(),
            secret: None,
            version: PROTOCOL_VERSION + 1,
        };
        match bad_version.validate() {
            Err(ProtocolError::VersionMismatch { .. }) => {}
            other => panic!("expected version mismatch, got {other:?}"),
        }

        let no_id = ServerInfo {
            id: String::new(),
            secret: None,
            version: PROTOCOL_VERSION,
        };
        assert!(no_id.validate().is_err());
    }

    #[test]
    fn test_request_wire_shape() {
        let req = ServerRequest::start_stage(Stage::Benchmark, Utc::now());
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["op"], "start_stage");
        assert_eq!(json["stage"], "benchmark");
        assert!(json.get("benchmark").is_none());

        let parsed: ServerRequest = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.op, RequestOp::StartStage);
        assert_eq!(parsed.stage, Some(Stage::Benchmark));
    }

    #[test]
    fn test_reply_roundtrip() {
        let reply = ClientReply {
            err: None,
            time: Utc::now(),
            stage_info: Some(StageInfo {
                finished: true,
                err: None,
            }),
            ops: None,
        };
        let text = serde_json::to_string(&reply).unwrap();
        let back: ClientReply = serde_json::from_str(&text).unwrap();
        assert!(back.stage_info.unwrap().finished);
    }
}
