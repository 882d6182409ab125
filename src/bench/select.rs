// src/bench/select.rs

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use super::{
    clear_prefix, random_key, run_worker_pool, Benchmark, BenchError, Common, PreparedObject,
    Recorder, RunSignals,
};
use crate::record::{OpType, Operations};

pub const DEFAULT_EXPRESSION: &str = "select * from s3object";

/// SELECT benchmark: runs an S3 Select expression against prepopulated CSV
/// objects and drains the result stream.
pub struct Select {
    pub common: Common,
    pub objects: usize,
    pub expression: String,
    prepared: Arc<Vec<PreparedObject>>,
}

impl Select {
    pub fn new(common: Common, objects: usize, expression: String) -> Select {
        Select {
            common,
            objects,
            expression,
            prepared: Arc::new(Vec::new()),
        }
    }
}

/// Generate a CSV body of roughly `target` bytes: a header plus rows of
/// random integers, the shape SELECT expressions actually scan.
fn csv_payload<R: Rng>(rng: &mut R, target: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(target as usize + 64);
    out.extend_from_slice(b"id,shard,value,flag\n");
    let mut id = 0u64;
    while (out.len() as u64) < target {
        let row = format!(
            "{},{},{},{}\n",
            id,
            rng.random_range(0..64u32),
            rng.random::<u32>(),
            rng.random_range(0..2u8),
        );
        out.extend_from_slice(row.as_bytes());
        id += 1;
    }
    out
}

#[async_trait]
impl Benchmark for Select {
    fn common(&self) -> &Common {
        &self.common
    }

    fn name(&self) -> &'static str {
        "select"
    }

    async fn prepare(&mut self) -> Result<()> {
        // CSV bodies, uploaded directly: the random payload source would not
        // produce scannable rows.
        let c = &self.common;
        let client = c.pool.pick();
        client
            .make_bucket(&c.bucket, &c.region)
            .await
            .map_err(|e| BenchError::PreparationFailed(e.to_string()))?;
        let target = c.payload.spec().max();
        let mut prepared = Vec::with_capacity(self.objects);
        let mut rng = SmallRng::from_rng(&mut rand::rng());
        for i in 0..self.objects {
            let key = random_key(&mut rng, &c.prefix);
            let data = csv_payload(&mut rng, target);
            let client = c.pool.pick();
            client
                .put_object(&c.bucket, &key, &data)
                .await
                .map_err(|e| BenchError::PreparationFailed(e.to_string()))?;
            prepared.push(PreparedObject {
                key,
                size: data.len() as u64,
                version_id: None,
            });
            c.report_progress((i + 1) as f64 / self.objects as f64);
        }
        self.prepared = Arc::new(prepared);
        Ok(())
    }

    async fn start(&mut self, signals: RunSignals) -> Result<Operations> {
        let c = &self.common;
        run_worker_pool(c.concurrency, |thread_id| {
            let mut signals = signals.clone();
            let pool = c.pool.clone();
            let bucket = c.bucket.clone();
            let live = Arc::clone(&c.live);
            let prepared = Arc::clone(&self.prepared);
            let expression = self.expression.clone();
            async move {
                signals.wait_start().await;
                let mut rec = Recorder::new(thread_id, live);
                let mut rng = SmallRng::from_rng(&mut rand::rng());
                while !signals.stop_requested() {
                    let obj = &prepared[rng.random_range(0..prepared.len())];
                    let client = pool.pick();
                    let start = Utc::now();
                    match client
                        .select_object_content(&bucket, &obj.key, &expression)
                        .await
                    {
                        Ok(fetched) => rec.record(
                            OpType::Select,
                            client.endpoint(),
                            1,
                            fetched.bytes,
                            Some(obj.key.clone()),
                            None,
                            start,
                            fetched.first_byte,
                            Utc::now(),
                        ),
                        Err(e) => rec.record(
                            OpType::Select,
                            client.endpoint(),
                            1,
                            0,
                            Some(obj.key.clone()),
                            Some(e.to_string()),
                            start,
                            None,
                            Utc::now(),
                        ),
                    }
                }
                rec.finish()
            }
        })
        .await
    }

    async fn cleanup(&mut self) {
        clear_prefix(&self.common).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_payload_shape() {
        let mut rng = SmallRng::from_rng(&mut rand::rng());
        let data = csv_payload(&mut rng, 4096);
        assert!(data.len() >= 4096);
        let text = String::from_utf8(data).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("id,shard,value,flag"));
        assert!(lines.next().unwrap().split(',').count() == 4);
    }
}
