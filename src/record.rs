// src/record.rs
//
// Per-operation timing records and the operations log.
//
// Every worker appends one `Operation` per storage request. Logs from
// different workers and hosts are concatenated and re-ordered by sorting on
// the start timestamp; within a single (client_id, thread_id) pair the
// sequence is strictly monotonic in start because each worker issues
// requests sequentially.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operation type token recorded with every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpType {
    Get,
    Put,
    Delete,
    Stat,
    List,
    Select,
}

impl OpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::Get => "GET",
            OpType::Put => "PUT",
            OpType::Delete => "DELETE",
            OpType::Stat => "STAT",
            OpType::List => "LIST",
            OpType::Select => "SELECT",
        }
    }

    pub fn parse(s: &str) -> Option<OpType> {
        match s {
            "GET" => Some(OpType::Get),
            "PUT" => Some(OpType::Put),
            "DELETE" => Some(OpType::Delete),
            "STAT" => Some(OpType::Stat),
            "LIST" => Some(OpType::List),
            "SELECT" => Some(OpType::Select),
            _ => None,
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single recorded storage request.
///
/// Immutable once appended. `start <= first_byte <= end` always holds for
/// successful operations; failed operations carry `error` and may have no
/// first-byte timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub op_type: OpType,
    /// Short opaque id, unique per run participant.
    pub client_id: String,
    /// Worker index, unique within (run, client_id). Offset on merge so the
    /// union stays globally unique.
    pub thread_id: u16,
    /// host:port the request was issued against.
    pub endpoint: String,
    /// Objects touched by this request (a DELETE batch touches several).
    pub object_count: u32,
    /// Body bytes in or out.
    pub bytes: u64,
    /// Logical object identifier, used for first-access accounting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_byte: Option<DateTime<Utc>>,
    pub end: DateTime<Utc>,
}

impl Operation {
    /// Wall duration of the request.
    pub fn duration(&self) -> Duration {
        (self.end - self.start).to_std().unwrap_or(Duration::ZERO)
    }

    /// Time to first byte, when the client reported one.
    pub fn ttfb(&self) -> Option<Duration> {
        let fb = self.first_byte?;
        (fb - self.start).to_std().ok()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// An append-only sequence of operations.
///
/// Orderings are rebuilt by sorting on `start` after ingestion; nothing here
/// assumes the backing vector arrives sorted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Operations(pub Vec<Operation>);

impl Operations {
    pub fn new() -> Self {
        Operations(Vec::new())
    }

    pub fn with_capacity(n: usize) -> Self {
        Operations(Vec::with_capacity(n))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, op: Operation) {
        self.0.push(op);
    }

    pub fn extend(&mut self, other: Operations) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.0.iter()
    }

    /// Stable sort by start timestamp.
    pub fn sort_by_start_time(&mut self) {
        self.0.sort_by_key(|op| op.start);
    }

    /// Stamp every record with the participant id.
    pub fn set_client_id(&mut self, id: &str) {
        for op in &mut self.0 {
            op.client_id = id.to_string();
        }
    }

    /// Shift all thread ids by `offset` and return the next free offset,
    /// i.e. `offset + max(thread_id) + 1`. Used when concatenating logs from
    /// several participants so `(thread_id)` values stay globally distinct.
    pub fn offset_threads(&mut self, offset: u16) -> u16 {
        let mut max_seen = 0u16;
        for op in &mut self.0 {
            op.thread_id = op.thread_id.saturating_add(offset);
            max_seen = max_seen.max(op.thread_id);
        }
        if self.0.is_empty() {
            offset
        } else {
            max_seen.saturating_add(1)
        }
    }

    /// Number of distinct (client_id, thread_id) pairs.
    pub fn threads(&self) -> usize {
        self.0
            .iter()
            .map(|op| (op.client_id.as_str(), op.thread_id))
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Distinct endpoints, sorted.
    pub fn endpoints(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|op| op.endpoint.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct operation types, sorted.
    pub fn op_types(&self) -> Vec<OpType> {
        self.0
            .iter()
            .map(|op| op.op_type)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// True when more than one operation type is present.
    pub fn is_mixed(&self) -> bool {
        self.op_types().len() > 1
    }

    pub fn filter_by_op(&self, t: OpType) -> Operations {
        Operations(self.0.iter().filter(|op| op.op_type == t).cloned().collect())
    }

    pub fn filter_by_endpoint(&self, host: &str) -> Operations {
        Operations(
            self.0
                .iter()
                .filter(|op| op.endpoint == host)
                .cloned()
                .collect(),
        )
    }

    /// Split into per-op-type logs.
    pub fn by_op(&self) -> BTreeMap<OpType, Operations> {
        let mut m: BTreeMap<OpType, Operations> = BTreeMap::new();
        for op in &self.0 {
            m.entry(op.op_type).or_default().push(op.clone());
        }
        m
    }

    /// Operations whose full lifetime lies inside `[from, to]`.
    pub fn filter_inside_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Operations {
        Operations(
            self.0
                .iter()
                .filter(|op| op.start >= from && op.end <= to)
                .cloned()
                .collect(),
        )
    }

    /// Overall `[min(start), max(end)]` of the log.
    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.0.iter().map(|op| op.start).min()?;
        let last = self.0.iter().map(|op| op.end).max()?;
        Some((first, last))
    }

    /// The interval during which every thread was live.
    ///
    /// With `all_threads` the range is `[max over threads of first start,
    /// min over threads of last end]`, which removes warm-up and cool-down
    /// skew. Without it (pre-filtered input) the plain time range is used.
    pub fn active_time_range(&self, all_threads: bool) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        if !all_threads {
            return self.time_range();
        }
        let mut per_thread: HashMap<(&str, u16), (DateTime<Utc>, DateTime<Utc>)> = HashMap::new();
        for op in &self.0 {
            let key = (op.client_id.as_str(), op.thread_id);
            per_thread
                .entry(key)
                .and_modify(|(s, e)| {
                    *s = (*s).min(op.start);
                    *e = (*e).max(op.end);
                })
                .or_insert((op.start, op.end));
        }
        let start = per_thread.values().map(|(s, _)| *s).max()?;
        let end = per_thread.values().map(|(_, e)| *e).min()?;
        Some((start, end))
    }

    /// Object count of the first operation, used to detect uniform batching.
    pub fn first_obj_per_op(&self) -> u32 {
        self.0.first().map(|op| op.object_count).unwrap_or(0)
    }

    /// True when successful operations carry differing per-object sizes.
    pub fn multiple_sizes(&self) -> bool {
        let mut seen: Option<u64> = None;
        for op in self.0.iter().filter(|op| !op.is_error() && op.object_count > 0) {
            let per_obj = op.bytes / op.object_count as u64;
            match seen {
                None => seen = Some(per_obj),
                Some(prev) if prev != per_obj => return true,
                Some(_) => {}
            }
        }
        false
    }

    pub fn total_bytes(&self) -> u64 {
        self.0.iter().map(|op| op.bytes).sum()
    }

    pub fn total_objects(&self) -> u64 {
        self.0.iter().map(|op| op.object_count as u64).sum()
    }

    pub fn n_errors(&self) -> u64 {
        self.0.iter().filter(|op| op.is_error()).count() as u64
    }

    /// First `n` distinct error strings, for the report.
    pub fn first_errors(&self, n: usize) -> Vec<String> {
        let mut out = Vec::new();
        for op in &self.0 {
            if let Some(err) = &op.error {
                if !out.contains(err) {
                    out.push(err.clone());
                    if out.len() >= n {
                        break;
                    }
                }
            }
        }
        out
    }

    /// Restrict to the first record (by start) touching each distinct `file`.
    ///
    /// Exposes cold-cache behavior distinctly from steady state. Records
    /// without a file identifier are dropped.
    pub fn first_accesses(&self) -> Operations {
        let mut sorted: Vec<&Operation> =
            self.0.iter().filter(|op| op.file.is_some()).collect();
        sorted.sort_by_key(|op| op.start);
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut out = Operations::new();
        for op in sorted {
            let file = op.file.as_deref().unwrap_or_default();
            if seen.insert(file) {
                out.push(op.clone());
            }
        }
        out
    }

    /// Verify per-(client, thread) monotonicity of start timestamps.
    /// Returns the offending pair when violated.
    pub fn check_thread_monotonic(&self) -> Result<(), (String, u16)> {
        let mut last: HashMap<(&str, u16), DateTime<Utc>> = HashMap::new();
        for op in &self.0 {
            let key = (op.client_id.as_str(), op.thread_id);
            if let Some(prev) = last.get(&key) {
                if op.start <= *prev {
                    return Err((op.client_id.clone(), op.thread_id));
                }
            }
            last.insert(key, op.start);
        }
        Ok(())
    }
}

impl IntoIterator for Operations {
    type Item = Operation;
    type IntoIter = std::vec::IntoIter<Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Operations {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Operation> for Operations {
    fn from_iter<T: IntoIterator<Item = Operation>>(iter: T) -> Self {
        Operations(iter.into_iter().collect())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use chrono::TimeZone;

    /// Build a successful operation lasting `dur_ms` starting `at_ms` after a
    /// fixed epoch.
    pub fn op(t: OpType, thread: u16, at_ms: i64, dur_ms: i64, bytes: u64) -> Operation {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let start = base + chrono::Duration::milliseconds(at_ms);
        let end = start + chrono::Duration::milliseconds(dur_ms);
        Operation {
            op_type: t,
            client_id: "c1".into(),
            thread_id: thread,
            endpoint: "127.0.0.1:9000".into(),
            object_count: 1,
            bytes,
            file: Some(format!("obj-{thread}-{at_ms}")),
            error: None,
            start,
            first_byte: Some(start + chrono::Duration::milliseconds(dur_ms / 2)),
            end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::op;
    use super::*;

    #[test]
    fn test_offset_threads_unique() {
        let mut a = Operations(vec![op(OpType::Get, 0, 0, 10, 100), op(OpType::Get, 9, 5, 10, 100)]);
        let mut b = Operations(vec![op(OpType::Get, 0, 0, 10, 100), op(OpType::Get, 4, 5, 10, 100)]);
        let next = a.offset_threads(0);
        assert_eq!(next, 10);
        let next = b.offset_threads(next);
        assert_eq!(next, 15);

        let mut all = Operations::new();
        all.extend(a);
        all.extend(b);
        let ids: std::collections::BTreeSet<u16> =
            all.iter().map(|o| o.thread_id).collect();
        assert_eq!(ids.len(), 4);
        assert!(ids.contains(&10) && ids.contains(&14));
    }

    #[test]
    fn test_active_time_range_all_threads() {
        // Thread 0 runs [0, 110); thread 1 runs [50, 200).
        let ops = Operations(vec![
            op(OpType::Get, 0, 0, 10, 1),
            op(OpType::Get, 0, 100, 10, 1),
            op(OpType::Get, 1, 50, 10, 1),
            op(OpType::Get, 1, 190, 10, 1),
        ]);
        let (a, b) = ops.active_time_range(true).unwrap();
        // Active range is [max thread start, min thread end] = [50, 110).
        assert_eq!((a - ops.0[0].start).num_milliseconds(), 50);
        assert_eq!((b - ops.0[0].start).num_milliseconds(), 110);
    }

    #[test]
    fn test_is_mixed() {
        let single = Operations(vec![op(OpType::Get, 0, 0, 10, 1)]);
        assert!(!single.is_mixed());
        let mixed = Operations(vec![op(OpType::Get, 0, 0, 10, 1), op(OpType::Put, 0, 20, 10, 1)]);
        assert!(mixed.is_mixed());
    }

    #[test]
    fn test_first_accesses() {
        let mut a = op(OpType::Get, 0, 0, 10, 1);
        a.file = Some("x".into());
        let mut b = op(OpType::Get, 0, 20, 10, 1);
        b.file = Some("x".into());
        let mut c = op(OpType::Get, 1, 5, 10, 1);
        c.file = Some("y".into());
        let ops = Operations(vec![b, a, c]);
        let fa = ops.first_accesses();
        assert_eq!(fa.len(), 2);
        // The earliest touch of "x" wins.
        let x = fa.iter().find(|o| o.file.as_deref() == Some("x")).unwrap();
        assert_eq!((x.start - fa.iter().map(|o| o.start).min().unwrap()).num_milliseconds(), 0);
    }

    #[test]
    fn test_thread_monotonic_check() {
        let good = Operations(vec![op(OpType::Get, 0, 0, 10, 1), op(OpType::Get, 0, 20, 10, 1)]);
        assert!(good.check_thread_monotonic().is_ok());
        let bad = Operations(vec![op(OpType::Get, 0, 20, 10, 1), op(OpType::Get, 0, 20, 10, 1)]);
        assert!(bad.check_thread_monotonic().is_err());
    }
}
