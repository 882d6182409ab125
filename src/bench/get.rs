// src/bench/get.rs

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use super::{
    clear_prefix, run_worker_pool, upload_objects, Benchmark, Common, PreparedObject, Recorder,
    RunSignals,
};
use crate::record::{OpType, Operations};

/// GET benchmark: downloads random prepopulated objects, optionally with
/// random byte ranges.
pub struct Get {
    pub common: Common,
    /// Objects to prepopulate; every worker samples from this set.
    pub objects: usize,
    /// Issue ranged reads with random offset and length.
    pub random_ranges: bool,
    prepared: Arc<Vec<PreparedObject>>,
}

impl Get {
    pub fn new(common: Common, objects: usize, random_ranges: bool) -> Get {
        Get {
            common,
            objects,
            random_ranges,
            prepared: Arc::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Benchmark for Get {
    fn common(&self) -> &Common {
        &self.common
    }

    fn name(&self) -> &'static str {
        "get"
    }

    async fn prepare(&mut self) -> Result<()> {
        self.prepared = Arc::new(upload_objects(&self.common, self.objects).await?);
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
            let random_ranges = self.random_ranges;
            async move {
                signals.wait_start().await;
                let mut rec = Recorder::new(thread_id, live);
                let mut rng = SmallRng::from_rng(&mut rand::rng());
                while !signals.stop_requested() {
                    let obj = &prepared[rng.random_range(0..prepared.len())];
                    let range = if random_ranges && obj.size > 1 {
                        let off = rng.random_range(0..obj.size - 1);
                        let len = rng.random_range(1..=obj.size - off);
                        Some((off, len))
                    } else {
                        None
                    };
                    let client = pool.pick();
                    let start = Utc::now();
                    match client.get_object(&bucket, &obj.key, range, None).await {
                        Ok(fetched) => rec.record(
                            OpType::Get,
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
                            OpType::Get,
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
