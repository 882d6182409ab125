// src/config.rs
//
// Client and benchmark configuration: environment variables, CLI flags, and
// the string flag-map representation forwarded to followers.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;

use crate::record::OpType;

pub const ENV_HOST: &str = "S3SURGE_HOST";
pub const ENV_ACCESS_KEY: &str = "S3SURGE_ACCESS_KEY";
pub const ENV_SECRET_KEY: &str = "S3SURGE_SECRET_KEY";
pub const ENV_TLS: &str = "S3SURGE_TLS";
pub const ENV_REGION: &str = "S3SURGE_REGION";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::InvalidConfig(msg.into())
}

/// Connection settings for the storage client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// One or more host:port endpoints; requests round-robin across them.
    pub hosts: Vec<String>,
    pub access_key: String,
    pub secret_key: String,
    pub tls: bool,
    pub region: String,
}

impl ClientConfig {
    pub fn from_env() -> ClientConfig {
        let hosts = std::env::var(ENV_HOST)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();
        ClientConfig {
            hosts,
            access_key: std::env::var(ENV_ACCESS_KEY).unwrap_or_default(),
            secret_key: std::env::var(ENV_SECRET_KEY).unwrap_or_default(),
            tls: matches!(
                std::env::var(ENV_TLS).unwrap_or_default().as_str(),
                "1" | "true" | "on" | "yes"
            ),
            region: std::env::var(ENV_REGION).unwrap_or_else(|_| "us-east-1".to_string()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hosts.is_empty() {
            return Err(invalid(format!("no storage endpoint; set {ENV_HOST} or --host")));
        }
        if self.access_key.is_empty() || self.secret_key.is_empty() {
            return Err(invalid(format!(
                "missing credentials; set {ENV_ACCESS_KEY} and {ENV_SECRET_KEY}"
            )));
        }
        Ok(())
    }
}

/// Parse sizes like "1048576", "64KiB", "10MiB", "1GB".
pub fn parse_size(s: &str) -> Result<u64, ConfigError> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let base: u64 = num
        .parse()
        .map_err(|_| invalid(format!("bad size {s:?}")))?;
    let mult = match unit.trim() {
        "" | "B" | "b" => 1,
        "KB" | "kb" => 1000,
        "KiB" | "K" | "k" => 1 << 10,
        "MB" | "mb" => 1000 * 1000,
        "MiB" | "M" | "m" => 1 << 20,
        "GB" | "gb" => 1000 * 1000 * 1000,
        "GiB" | "G" | "g" => 1 << 30,
        "TB" => 1000u64.pow(4),
        "TiB" | "T" => 1 << 40,
        other => return Err(invalid(format!("unknown size unit {other:?}"))),
    };
    Ok(base * mult)
}

/// Benchmark invocation options, shared by the CLI and the wire payload.
#[derive(Debug, Clone)]
pub struct BenchOpts {
    pub command: String,
    pub duration: Duration,
    pub concurrency: usize,
    pub objects: usize,
    pub obj_size: u64,
    pub rand_size: bool,
    pub bucket: String,
    pub prefix: String,
    /// DELETE batch size, >= 1.
    pub batch: usize,
    /// Ranged GETs with random offset/length.
    pub range: bool,
    /// SELECT expression.
    pub query: String,
    pub get_weight: f64,
    pub stat_weight: f64,
    pub put_weight: f64,
    pub delete_weight: f64,
    /// Seed for the materialized mixed schedule.
    pub seed: u64,
    pub noclear: bool,
    pub keep_data: bool,
    pub autoterm: bool,
    pub autoterm_dur: Duration,
    pub autoterm_pct: f64,
}

impl BenchOpts {
    pub fn new(command: &str) -> BenchOpts {
        BenchOpts {
            command: command.to_string(),
            duration: Duration::from_secs(300),
            concurrency: 20,
            objects: 2500,
            obj_size: 10 << 20,
            rand_size: false,
            bucket: "s3surge-benchmark".to_string(),
            prefix: "s3surge".to_string(),
            batch: 100,
            range: false,
            query: crate::bench::select::DEFAULT_EXPRESSION.to_string(),
            get_weight: 45.0,
            stat_weight: 30.0,
            put_weight: 15.0,
            delete_weight: 10.0,
            seed: 0,
            noclear: false,
            keep_data: false,
            autoterm: false,
            autoterm_dur: Duration::from_secs(10),
            autoterm_pct: 7.5,
        }
    }

    /// Weights for the mixed/versioned schedule.
    pub fn weights(&self) -> BTreeMap<OpType, f64> {
        BTreeMap::from([
            (OpType::Get, self.get_weight),
            (OpType::Stat, self.stat_weight),
            (OpType::Put, self.put_weight),
            (OpType::Delete, self.delete_weight),
        ])
    }

    /// `distributed` rejects options only the coordinator may decide.
    pub fn validate(&self, distributed: bool) -> Result<(), ConfigError> {
        if self.duration.is_zero() {
            return Err(invalid("duration must be > 0"));
        }
        if self.concurrency == 0 {
            return Err(invalid("concurrent must be > 0"));
        }
        if self.concurrency > u16::MAX as usize {
            return Err(invalid("concurrent must fit a 16-bit thread id"));
        }
        if self.objects == 0 {
            return Err(invalid("objects must be > 0"));
        }
        if self.batch == 0 {
            return Err(invalid("batch must be >= 1"));
        }
        if self.bucket.is_empty() {
            return Err(invalid("bucket must not be empty"));
        }
        if self.autoterm {
            if distributed {
                // Only the coordinator decides when a distributed run stops.
                return Err(invalid("autoterm cannot be used in coordinator/follower mode"));
            }
            if self.autoterm_dur.is_zero() {
                return Err(invalid("autoterm.dur must be > 0"));
            }
            if self.autoterm_pct <= 0.0 {
                return Err(invalid("autoterm.pct must be > 0"));
            }
        }
        if matches!(self.command.as_str(), "mixed" | "versioned")
            && self.delete_weight > self.put_weight
        {
            return Err(invalid("delete-distrib must not exceed put-distrib"));
        }
        Ok(())
    }

    /// Serialize into the wire flag map. Values round-trip through
    /// `from_flag_map`; coordinator-only flags never enter this map.
    pub fn to_flag_map(&self) -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert("duration".into(), humantime::format_duration(self.duration).to_string());
        m.insert("concurrent".into(), self.concurrency.to_string());
        m.insert("objects".into(), self.objects.to_string());
        m.insert("obj.size".into(), self.obj_size.to_string());
        m.insert("obj.randsize".into(), self.rand_size.to_string());
        m.insert("bucket".into(), self.bucket.clone());
        m.insert("prefix".into(), self.prefix.clone());
        m.insert("batch".into(), self.batch.to_string());
        m.insert("range".into(), self.range.to_string());
        m.insert("select.query".into(), self.query.clone());
        m.insert("get-distrib".into(), self.get_weight.to_string());
        m.insert("stat-distrib".into(), self.stat_weight.to_string());
        m.insert("put-distrib".into(), self.put_weight.to_string());
        m.insert("delete-distrib".into(), self.delete_weight.to_string());
        m.insert("seed".into(), self.seed.to_string());
        m.insert("noclear".into(), self.noclear.to_string());
        m.insert("keep-data".into(), self.keep_data.to_string());
        m
    }

    /// Reconstruct options from a wire flag map. Unknown flags are ignored
    /// so newer coordinators can talk to older followers.
    pub fn from_flag_map(
        command: &str,
        flags: &BTreeMap<String, String>,
    ) -> Result<BenchOpts, ConfigError> {
        let mut opts = BenchOpts::new(command);
        for (key, value) in flags {
            match key.as_str() {
                "duration" => {
                    opts.duration = humantime::parse_duration(value)
                        .map_err(|e| invalid(format!("duration: {e}")))?
                }
                "concurrent" => {
                    opts.concurrency =
                        value.parse().map_err(|e| invalid(format!("concurrent: {e}")))?
                }
                "objects" => {
                    opts.objects = value.parse().map_err(|e| invalid(format!("objects: {e}")))?
                }
                "obj.size" => opts.obj_size = parse_size(value)?,
                "obj.randsize" => {
                    opts.rand_size =
                        value.parse().map_err(|e| invalid(format!("obj.randsize: {e}")))?
                }
                "bucket" => opts.bucket = value.clone(),
                "prefix" => opts.prefix = value.clone(),
                "batch" => opts.batch = value.parse().map_err(|e| invalid(format!("batch: {e}")))?,
                "range" => opts.range = value.parse().map_err(|e| invalid(format!("range: {e}")))?,
                "select.query" => opts.query = value.clone(),
                "get-distrib" => {
                    opts.get_weight =
                        value.parse().map_err(|e| invalid(format!("get-distrib: {e}")))?
                }
                "stat-distrib" => {
                    opts.stat_weight =
                        value.parse().map_err(|e| invalid(format!("stat-distrib: {e}")))?
                }
                "put-distrib" => {
                    opts.put_weight =
                        value.parse().map_err(|e| invalid(format!("put-distrib: {e}")))?
                }
                "delete-distrib" => {
                    opts.delete_weight = value
                        .parse()
                        .map_err(|e| invalid(format!("delete-distrib: {e}")))?
                }
                "seed" => opts.seed = value.parse().map_err(|e| invalid(format!("seed: {e}")))?,
                "noclear" => {
                    opts.noclear = value.parse().map_err(|e| invalid(format!("noclear: {e}")))?
                }
                "keep-data" => {
                    opts.keep_data =
                        value.parse().map_err(|e| invalid(format!("keep-data: {e}")))?
                }
                "autoterm" | "autoterm.dur" | "autoterm.pct" => {
                    // Followers never auto-terminate.
                    return Err(invalid("autoterm cannot be forwarded to followers"));
                }
                _ => {}
            }
        }
        opts.validate(true)?;
        Ok(opts)
    }
}

/// Join an argv into a printable command line with credential values masked.
pub fn redact_command_line<S: AsRef<str>>(args: &[S]) -> String {
    const SECRET_FLAGS: [&str; 2] = ["--access-key", "--secret-key"];
    let mut out: Vec<String> = Vec::with_capacity(args.len());
    let mut mask_next = false;
    for arg in args {
        let arg = arg.as_ref();
        if mask_next {
            out.push("*REDACTED*".to_string());
            mask_next = false;
            continue;
        }
        if let Some(flag) = SECRET_FLAGS.iter().find(|f| arg.starts_with(**f)) {
            if arg.len() > flag.len() && arg.as_bytes()[flag.len()] == b'=' {
                out.push(format!("{flag}=*REDACTED*"));
            } else {
                out.push(arg.to_string());
                mask_next = true;
            }
            continue;
        }
        out.push(arg.to_string());
    }
    out.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("64KiB").unwrap(), 64 << 10);
        assert_eq!(parse_size("10MiB").unwrap(), 10 << 20);
        assert_eq!(parse_size("1GB").unwrap(), 1_000_000_000);
        assert!(parse_size("10XB").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn test_flag_map_roundtrip() {
        let mut opts = BenchOpts::new("get");
        opts.duration = Duration::from_secs(120);
        opts.concurrency = 8;
        opts.objects = 500;
        opts.obj_size = 1 << 20;
        opts.range = true;
        opts.noclear = true;
        let map = opts.to_flag_map();
        let back = BenchOpts::from_flag_map("get", &map).unwrap();
        assert_eq!(back.duration, opts.duration);
        assert_eq!(back.concurrency, opts.concurrency);
        assert_eq!(back.objects, opts.objects);
        assert_eq!(back.obj_size, opts.obj_size);
        assert!(back.range);
        assert!(back.noclear);
    }

    #[test]
    fn test_autoterm_rejected_over_wire() {
        let mut map = BenchOpts::new("get").to_flag_map();
        map.insert("autoterm".into(), "true".into());
        assert!(BenchOpts::from_flag_map("get", &map).is_err());
    }

    #[test]
    fn test_autoterm_rejected_when_distributed() {
        let mut opts = BenchOpts::new("get");
        opts.autoterm = true;
        assert!(opts.validate(false).is_ok());
        assert!(opts.validate(true).is_err());
    }

    #[test]
    fn test_mixed_delete_weight_bound() {
        let mut opts = BenchOpts::new("mixed");
        opts.delete_weight = 50.0;
        opts.put_weight = 10.0;
        assert!(opts.validate(false).is_err());
    }

    #[test]
    fn test_redact_command_line() {
        let line = redact_command_line(&[
            "s3surge", "get", "--access-key", "AKIA123", "--secret-key=shh", "--bucket", "b",
        ]);
        assert_eq!(
            line,
            "s3surge get --access-key *REDACTED* --secret-key=*REDACTED* --bucket b"
        );
        assert!(!line.contains("AKIA123"));
        assert!(!line.contains("shh"));
    }
}
