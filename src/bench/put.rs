// src/bench/put.rs

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::Arc;

use super::{
    clear_prefix, random_key, run_worker_pool, Benchmark, BenchError, Common, Recorder,
    RunSignals,
};
use crate::record::{OpType, Operations};

/// PUT benchmark: uploads objects under random keys for the whole window.
pub struct Put {
    pub common: Common,
}

impl Put {
    pub fn new(common: Common) -> Put {
        Put { common }
    }
}

#[async_trait]
impl Benchmark for Put {
    fn common(&self) -> &Common {
        &self.common
    }

    fn name(&self) -> &'static str {
        "put"
    }

    async fn prepare(&mut self) -> Result<()> {
        let client = self.common.pool.pick();
        client
            .make_bucket(&self.common.bucket, &self.common.region)
            .await
            .map_err(|e| BenchError::PreparationFailed(e.to_string()))?;
        self.common.report_progress(1.0);
        Ok(())
    }

    async fn start(&mut self, signals: RunSignals) -> Result<Operations> {
        let c = &self.common;
        run_worker_pool(c.concurrency, |thread_id| {
            let mut signals = signals.clone();
            let pool = c.pool.clone();
            let bucket = c.bucket.clone();
            let prefix = c.prefix.clone();
            let payload = Arc::clone(&c.payload);
            let live = Arc::clone(&c.live);
            async move {
                signals.wait_start().await;
                let mut rec = Recorder::new(thread_id, live);
                let mut rng = SmallRng::from_rng(&mut rand::rng());
                while !signals.stop_requested() {
                    let key = random_key(&mut rng, &prefix);
                    let size = payload.object_size(&mut rng);
                    let data = payload.payload(&mut rng, size);
                    let client = pool.pick();
                    let start = Utc::now();
                    let result = client.put_object(&bucket, &key, &data).await;
                    let end = Utc::now();
                    match result {
                        Ok(_) => rec.record(
                            OpType::Put,
                            client.endpoint(),
                            1,
                            size,
                            Some(key),
                            None,
                            start,
                            None,
                            end,
                        ),
                        Err(e) => rec.record(
                            OpType::Put,
                            client.endpoint(),
                            1,
                            0,
                            Some(key),
                            Some(e.to_string()),
                            start,
                            None,
                            end,
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
