// src/bench/stat.rs

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

/// STAT benchmark: metadata-only HEAD requests against random prepopulated
/// objects.
pub struct Stat {
    pub common: Common,
    pub objects: usize,
    prepared: Arc<Vec<PreparedObject>>,
}

impl Stat {
    pub fn new(common: Common, objects: usize) -> Stat {
        Stat {
            common,
            objects,
            prepared: Arc::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Benchmark for Stat {
    fn common(&self) -> &Common {
        &self.common
    }

    fn name(&self) -> &'static str {
        "stat"
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
            async move {
                signals.wait_start().await;
                let mut rec = Recorder::new(thread_id, live);
                let mut rng = SmallRng::from_rng(&mut rand::rng());
                while !signals.stop_requested() {
                    let obj = &prepared[rng.random_range(0..prepared.len())];
                    let client = pool.pick();
                    let start = Utc::now();
                    let result = client.stat_object(&bucket, &obj.key, None).await;
                    let end = Utc::now();
                    rec.record(
                        OpType::Stat,
                        client.endpoint(),
                        1,
                        0,
                        Some(obj.key.clone()),
                        result.err().map(|e| e.to_string()),
                        start,
                        None,
                        end,
                    );
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
