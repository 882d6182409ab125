// src/bench/list.rs

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::sync::Arc;

use super::{
    clear_prefix, run_worker_pool, upload_named, Benchmark, Common, Recorder, RunSignals,
};
use crate::record::{OpType, Operations};

/// LIST benchmark. Objects are spread over one sub-prefix per worker so each
/// listing returns a bounded, predictable slice and workers never contend on
/// the same continuation tokens.
pub struct List {
    pub common: Common,
    /// Total objects to prepopulate across all worker prefixes.
    pub objects: usize,
}

impl List {
    pub fn new(common: Common, objects: usize) -> List {
        List { common, objects }
    }

    fn sub_prefix(&self, thread_id: u16) -> String {
        format!("{}/{:04}", self.common.prefix, thread_id)
    }
}

#[async_trait]
impl Benchmark for List {
    fn common(&self) -> &Common {
        &self.common
    }

    fn name(&self) -> &'static str {
        "list"
    }

    async fn prepare(&mut self) -> Result<()> {
        let per_prefix = (self.objects / self.common.concurrency).max(1);
        let mut keys = Vec::with_capacity(per_prefix * self.common.concurrency);
        {
            let mut rng = rand::rng();
            for thread_id in 0..self.common.concurrency as u16 {
                let prefix = self.sub_prefix(thread_id);
                for _ in 0..per_prefix {
                    let name: String = (&mut rng)
                        .sample_iter(&rand::distr::Alphanumeric)
                        .take(16)
                        .map(char::from)
                        .collect();
                    keys.push(format!("{prefix}/{name}.rnd"));
                }
            }
        }
        upload_named(&self.common, keys).await?;
        Ok(())
    }

    async fn start(&mut self, signals: RunSignals) -> Result<Operations> {
        let c = &self.common;
        run_worker_pool(c.concurrency, |thread_id| {
            let mut signals = signals.clone();
            let pool = c.pool.clone();
            let bucket = c.bucket.clone();
            let live = Arc::clone(&c.live);
            let prefix = self.sub_prefix(thread_id);
            async move {
                signals.wait_start().await;
                let mut rec = Recorder::new(thread_id, live);
                while !signals.stop_requested() {
                    let client = pool.pick();
                    let start = Utc::now();
                    let result = client.list_objects(&bucket, &prefix).await;
                    let end = Utc::now();
                    match result {
                        Ok(entries) => rec.record(
                            OpType::List,
                            client.endpoint(),
                            entries.len() as u32,
                            0,
                            None,
                            None,
                            start,
                            None,
                            end,
                        ),
                        Err(e) => rec.record(
                            OpType::List,
                            client.endpoint(),
                            0,
                            0,
                            None,
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
