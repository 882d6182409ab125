// src/bench/delete.rs

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;

use super::{
    clear_prefix, run_worker_pool, upload_objects, Benchmark, Common, PreparedObject, Recorder,
    RunSignals,
};
use crate::client::ObjectRef;
use crate::record::{OpType, Operations};

/// DELETE benchmark: removes prepopulated objects in batches until either
/// the window closes or the object pool is exhausted. Workers that find the
/// pool empty exit early; the deadline still bounds the run.
pub struct Delete {
    pub common: Common,
    pub objects: usize,
    /// Objects per removal request, >= 1.
    pub batch: usize,
    pool: Arc<Mutex<Vec<PreparedObject>>>,
}

impl Delete {
    pub fn new(common: Common, objects: usize, batch: usize) -> Delete {
        Delete {
            common,
            objects,
            batch: batch.max(1),
            pool: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Benchmark for Delete {
    fn common(&self) -> &Common {
        &self.common
    }

    fn name(&self) -> &'static str {
        "delete"
    }

    async fn prepare(&mut self) -> Result<()> {
        let prepared = upload_objects(&self.common, self.objects).await?;
        *self.pool.lock() = prepared;
        Ok(())
    }

    async fn start(&mut self, signals: RunSignals) -> Result<Operations> {
        let c = &self.common;
        run_worker_pool(c.concurrency, |thread_id| {
            let mut signals = signals.clone();
            let clients = c.pool.clone();
            let bucket = c.bucket.clone();
            let live = Arc::clone(&c.live);
            let objects = Arc::clone(&self.pool);
            let batch = self.batch;
            async move {
                signals.wait_start().await;
                let mut rec = Recorder::new(thread_id, live);
                while !signals.stop_requested() {
                    let taken: Vec<PreparedObject> = {
                        let mut pool = objects.lock();
                        let n = batch.min(pool.len());
                        pool.drain(..n).collect()
                    };
                    if taken.is_empty() {
                        break;
                    }
                    let refs: Vec<ObjectRef> = taken
                        .iter()
                        .map(|o| ObjectRef {
                            key: o.key.clone(),
                            version_id: None,
                        })
                        .collect();
                    let client = clients.pick();
                    let start = Utc::now();
                    let result = client.remove_objects(&bucket, &refs).await;
                    let end = Utc::now();
                    rec.record(
                        OpType::Delete,
                        client.endpoint(),
                        taken.len() as u32,
                        0,
                        None,
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
