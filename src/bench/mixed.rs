// src/bench/mixed.rs

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use super::{
    clear_prefix, random_key, run_worker_pool, upload_objects, Benchmark, Common, PreparedObject,
    Recorder, RunSignals,
};
use crate::distribution::MixedDistribution;
use crate::record::{OpType, Operations};

/// Mixed benchmark: each worker step takes the next op type from the
/// materialized schedule and dispatches to the matching single-op path. All
/// op types share one pool of prepopulated objects; PUT grows it, DELETE
/// shrinks it, GET/STAT sample it.
pub struct Mixed {
    pub common: Common,
    pub objects: usize,
    pub dist: Arc<MixedDistribution>,
    pool: Arc<Mutex<Vec<PreparedObject>>>,
}

impl Mixed {
    pub fn new(common: Common, objects: usize, dist: MixedDistribution) -> Mixed {
        Mixed {
            common,
            objects,
            dist: Arc::new(dist),
            pool: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

fn sample(pool: &Mutex<Vec<PreparedObject>>, rng: &mut SmallRng) -> Option<PreparedObject> {
    let pool = pool.lock();
    if pool.is_empty() {
        return None;
    }
    Some(pool[rng.random_range(0..pool.len())].clone())
}

fn take(pool: &Mutex<Vec<PreparedObject>>, rng: &mut SmallRng) -> Option<PreparedObject> {
    let mut pool = pool.lock();
    if pool.is_empty() {
        return None;
    }
    let i = rng.random_range(0..pool.len());
    Some(pool.swap_remove(i))
}

#[async_trait]
impl Benchmark for Mixed {
    fn common(&self) -> &Common {
        &self.common
    }

    fn name(&self) -> &'static str {
        "mixed"
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
            let prefix = c.prefix.clone();
            let payload = Arc::clone(&c.payload);
            let live = Arc::clone(&c.live);
            let dist = Arc::clone(&self.dist);
            let objects = Arc::clone(&self.pool);
            async move {
                signals.wait_start().await;
                let mut rec = Recorder::new(thread_id, live);
                let mut rng = SmallRng::from_rng(&mut rand::rng());
                while !signals.stop_requested() {
                    let client = clients.pick();
                    let endpoint = client.endpoint();
                    match dist.next() {
                        OpType::Put => {
                            let key = random_key(&mut rng, &prefix);
                            let size = payload.object_size(&mut rng);
                            let data = payload.payload(&mut rng, size);
                            let start = Utc::now();
                            let result = client.put_object(&bucket, &key, &data).await;
                            let end = Utc::now();
                            match result {
                                Ok(put) => {
                                    objects.lock().push(PreparedObject {
                                        key: key.clone(),
                                        size,
                                        version_id: put.version_id,
                                    });
                                    rec.record(
                                        OpType::Put, endpoint, 1, size, Some(key), None, start,
                                        None, end,
                                    );
                                }
                                Err(e) => rec.record(
                                    OpType::Put,
                                    endpoint,
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
                        OpType::Delete => {
                            let Some(obj) = take(&objects, &mut rng) else {
                                continue;
                            };
                            let start = Utc::now();
                            let result = client.remove_object(&bucket, &obj.key, None).await;
                            let end = Utc::now();
                            rec.record(
                                OpType::Delete,
                                endpoint,
                                1,
                                0,
                                Some(obj.key),
                                result.err().map(|e| e.to_string()),
                                start,
                                None,
                                end,
                            );
                        }
                        OpType::Stat => {
                            let Some(obj) = sample(&objects, &mut rng) else {
                                continue;
                            };
                            let start = Utc::now();
                            let result = client.stat_object(&bucket, &obj.key, None).await;
                            let end = Utc::now();
                            rec.record(
                                OpType::Stat,
                                endpoint,
                                1,
                                0,
                                Some(obj.key),
                                result.err().map(|e| e.to_string()),
                                start,
                                None,
                                end,
                            );
                        }
                        // GET carries every remaining schedule token.
                        _ => {
                            let Some(obj) = sample(&objects, &mut rng) else {
                                continue;
                            };
                            let start = Utc::now();
                            match client.get_object(&bucket, &obj.key, None, None).await {
                                Ok(fetched) => rec.record(
                                    OpType::Get,
                                    endpoint,
                                    1,
                                    fetched.bytes,
                                    Some(obj.key),
                                    None,
                                    start,
                                    fetched.first_byte,
                                    Utc::now(),
                                ),
                                Err(e) => rec.record(
                                    OpType::Get,
                                    endpoint,
                                    1,
                                    0,
                                    Some(obj.key),
                                    Some(e.to_string()),
                                    start,
                                    None,
                                    Utc::now(),
                                ),
                            }
                        }
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
