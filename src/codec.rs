// src/codec.rs
//
// On-disk operations log: a self-describing tab-separated CSV wrapped in a
// streaming zstd frame (`.csv.zst`).
//
// The first row names the columns. Timestamps are RFC3339 with nanosecond
// precision. A trailing row prefixed with '#' captures the invoking command
// line (secrets already redacted by the caller). The decoder accepts an
// offset/limit window for large inputs and reports progress through an
// injected logger so it stays independent of any output layer.

use std::io::{BufRead, BufReader, BufWriter, Read, Write};

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::record::{OpType, Operation, Operations};

/// Column order of the on-disk format. `idx` is first by contract.
pub const CSV_HEADER: &str =
    "idx\tthread\top\tclient_id\tn_objects\tbytes\tendpoint\tfile\terror\tstart\tfirst_byte\tend\tduration_ns";

const REQUIRED_COLUMNS: [&str; 12] = [
    "idx", "thread", "op", "client_id", "n_objects", "bytes", "endpoint", "file", "error",
    "start", "first_byte", "end",
];

const ZSTD_LEVEL: i32 = 3;
const PROGRESS_EVERY: usize = 100_000;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
    #[error("schema mismatch: missing column {0:?}")]
    SchemaMismatch(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(s: &str, line: usize) -> Result<DateTime<Utc>, CodecError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CodecError::MalformedRecord {
            line,
            reason: format!("bad timestamp {s:?}: {e}"),
        })
}

/// Serialize a log as zstd-compressed CSV.
///
/// `comment` is appended as a trailing `#`-prefixed row; pass the redacted
/// invoking command line.
pub fn write_csv_zst<W: Write>(ops: &Operations, out: W, comment: &str) -> Result<(), CodecError> {
    let encoder = zstd::stream::Encoder::new(out, ZSTD_LEVEL)?.auto_finish();
    let mut w = BufWriter::with_capacity(64 * 1024, encoder);
    writeln!(w, "{CSV_HEADER}")?;
    for (idx, op) in ops.iter().enumerate() {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            idx,
            op.thread_id,
            op.op_type,
            op.client_id,
            op.object_count,
            op.bytes,
            op.endpoint,
            op.file.as_deref().unwrap_or(""),
            op.error.as_deref().unwrap_or(""),
            fmt_time(op.start),
            op.first_byte.map(fmt_time).unwrap_or_default(),
            fmt_time(op.end),
            (op.end - op.start).num_nanoseconds().unwrap_or(0),
        )?;
    }
    if !comment.is_empty() {
        writeln!(w, "# {comment}")?;
    }
    w.flush()?;
    Ok(())
}

/// Decode a zstd-compressed CSV log.
///
/// `offset` rows are skipped after the header; `limit` caps the number of
/// rows read, with 0 meaning unlimited. `progress` is called every
/// 100k rows with the running count.
pub fn read_csv_zst<R: Read>(
    input: R,
    offset: usize,
    limit: usize,
    progress: impl Fn(usize),
) -> Result<Operations, CodecError> {
    let decoder = zstd::stream::Decoder::new(input)?;
    let reader = BufReader::with_capacity(64 * 1024, decoder);
    let mut lines = reader.lines();

    let header = match lines.next() {
        Some(line) => line?,
        None => return Err(CodecError::SchemaMismatch("idx".into())),
    };
    let columns: Vec<&str> = header.trim_end().split('\t').collect();
    let col = |name: &str| -> Result<usize, CodecError> {
        columns
            .iter()
            .position(|c| *c == name)
            .ok_or_else(|| CodecError::SchemaMismatch(name.to_string()))
    };
    for required in REQUIRED_COLUMNS {
        col(required)?;
    }
    let (c_thread, c_op, c_client) = (col("thread")?, col("op")?, col("client_id")?);
    let (c_objects, c_bytes, c_endpoint) = (col("n_objects")?, col("bytes")?, col("endpoint")?);
    let (c_file, c_error) = (col("file")?, col("error")?);
    let (c_start, c_first_byte, c_end) = (col("start")?, col("first_byte")?, col("end")?);

    let mut ops = Operations::new();
    let mut seen = 0usize;
    for (i, line) in lines.enumerate() {
        let line_no = i + 2;
        let line = line?;
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        seen += 1;
        if seen <= offset {
            continue;
        }
        if limit > 0 && ops.len() >= limit {
            break;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < columns.len() {
            return Err(CodecError::MalformedRecord {
                line: line_no,
                reason: format!("expected {} fields, found {}", columns.len(), fields.len()),
            });
        }
        let parse_num = |idx: usize, what: &str| -> Result<u64, CodecError> {
            fields[idx].parse::<u64>().map_err(|e| CodecError::MalformedRecord {
                line: line_no,
                reason: format!("bad {what} {:?}: {e}", fields[idx]),
            })
        };
        let op_type = OpType::parse(fields[c_op]).ok_or_else(|| CodecError::MalformedRecord {
            line: line_no,
            reason: format!("unknown op type {:?}", fields[c_op]),
        })?;
        let opt = |idx: usize| -> Option<String> {
            let v = fields[idx];
            if v.is_empty() { None } else { Some(v.to_string()) }
        };
        let first_byte = if fields[c_first_byte].is_empty() {
            None
        } else {
            Some(parse_time(fields[c_first_byte], line_no)?)
        };
        let op = Operation {
            op_type,
            client_id: fields[c_client].to_string(),
            thread_id: parse_num(c_thread, "thread")? as u16,
            endpoint: fields[c_endpoint].to_string(),
            object_count: parse_num(c_objects, "n_objects")? as u32,
            bytes: parse_num(c_bytes, "bytes")?,
            file: opt(c_file),
            error: opt(c_error),
            start: parse_time(fields[c_start], line_no)?,
            first_byte,
            end: parse_time(fields[c_end], line_no)?,
        };
        if op.end < op.start {
            return Err(CodecError::MalformedRecord {
                line: line_no,
                reason: "end precedes start".into(),
            });
        }
        ops.push(op);
        if ops.len() % PROGRESS_EVERY == 0 {
            progress(ops.len());
        }
    }
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::testutil::op;

    fn sample() -> Operations {
        Operations(vec![
            op(OpType::Get, 0, 0, 25, 4096),
            op(OpType::Get, 1, 10, 30, 4096),
            op(OpType::Get, 0, 40, 20, 4096),
        ])
    }

    #[test]
    fn test_roundtrip() {
        let ops = sample();
        let mut buf = Vec::new();
        write_csv_zst(&ops, &mut buf, "s3surge get --bucket test").unwrap();
        let back = read_csv_zst(&buf[..], 0, 0, |_| {}).unwrap();
        assert_eq!(back.len(), ops.len());
        for (a, b) in ops.iter().zip(back.iter()) {
            assert_eq!(a.op_type, b.op_type);
            assert_eq!(a.thread_id, b.thread_id);
            assert_eq!(a.bytes, b.bytes);
            assert_eq!(a.start, b.start);
            assert_eq!(a.first_byte, b.first_byte);
            assert_eq!(a.end, b.end);
            assert_eq!(a.file, b.file);
        }
    }

    #[test]
    fn test_offset_and_limit() {
        let ops = sample();
        let mut buf = Vec::new();
        write_csv_zst(&ops, &mut buf, "").unwrap();
        let back = read_csv_zst(&buf[..], 1, 1, |_| {}).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back.0[0].thread_id, 1);
        // limit 0 is unlimited
        let back = read_csv_zst(&buf[..], 0, 0, |_| {}).unwrap();
        assert_eq!(back.len(), 3);
    }

    #[test]
    fn test_schema_mismatch() {
        let mut raw = Vec::new();
        {
            let mut enc = zstd::stream::Encoder::new(&mut raw, 3).unwrap().auto_finish();
            writeln!(enc, "idx\tthread\top").unwrap();
            writeln!(enc, "0\t1\tGET").unwrap();
        }
        match read_csv_zst(&raw[..], 0, 0, |_| {}) {
            Err(CodecError::SchemaMismatch(col)) => assert_eq!(col, "client_id"),
            other => panic!("expected schema mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_record() {
        let mut raw = Vec::new();
        {
            let mut enc = zstd::stream::Encoder::new(&mut raw, 3).unwrap().auto_finish();
            writeln!(enc, "{CSV_HEADER}").unwrap();
            writeln!(
                enc,
                "0\tnot-a-number\tGET\tc1\t1\t100\thost:9000\t\t\t2025-06-01T12:00:00Z\t\t2025-06-01T12:00:01Z\t0"
            )
            .unwrap();
        }
        match read_csv_zst(&raw[..], 0, 0, |_| {}) {
            Err(CodecError::MalformedRecord { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed record, got {other:?}"),
        }
    }

    #[test]
    fn test_comment_row_ignored() {
        let ops = sample();
        let mut buf = Vec::new();
        write_csv_zst(&ops, &mut buf, "cmdline --access-key *REDACTED*").unwrap();
        let back = read_csv_zst(&buf[..], 0, 0, |_| {}).unwrap();
        assert_eq!(back.len(), 3);
    }
}
