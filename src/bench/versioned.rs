// src/bench/versioned.rs

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use super::{
    clear_prefix, run_worker_pool, upload_objects, Benchmark, Common, Recorder, RunSignals,
};
use crate::distribution::MixedDistribution;
use crate::record::{OpType, Operations};

/// A (key, version) pair in the live pool.
#[derive(Debug, Clone)]
struct Version {
    key: String,
    version_id: Option<String>,
}

/// Versioned mixed benchmark. Works on a versioning-enabled bucket: PUT
/// writes a new version of an existing key, GET/STAT address a specific
/// version, DELETE removes exactly one version. Two workers may race for the
/// same version on DELETE; the loser's NotFound is recorded as an ordinary
/// failed operation.
pub struct Versioned {
    pub common: Common,
    pub objects: usize,
    pub dist: Arc<MixedDistribution>,
    pool: Arc<Mutex<Vec<Version>>>,
}

impl Versioned {
    pub fn new(common: Common, objects: usize, dist: MixedDistribution) -> Versioned {
        Versioned {
            common,
            objects,
            dist: Arc::new(dist),
            pool: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Benchmark for Versioned {
    fn common(&self) -> &Common {
        &self.common
    }

    fn name(&self) -> &'static str {
        "versioned"
    }

    async fn prepare(&mut self) -> Result<()> {
        let prepared = upload_objects(&self.common, self.objects).await?;
        *self.pool.lock() = prepared
            .into_iter()
            .map(|o| Version {
                key: o.key,
                version_id: o.version_id,
            })
            .collect();
        Ok(())
    }

    async fn start(&mut self, signals: RunSignals) -> Result<Operations> {
        let c = &self.common;
        run_worker_pool(c.concurrency, |thread_id| {
            let mut signals = signals.clone();
            let clients = c.pool.clone();
            let bucket = c.bucket.clone();
            let payload = Arc::clone(&c.payload);
            let live = Arc::clone(&c.live);
            let dist = Arc::clone(&self.dist);
            let versions = Arc::clone(&self.pool);
            async move {
                signals.wait_start().await;
                let mut rec = Recorder::new(thread_id, live);
                let mut rng = SmallRng::from_rng(&mut rand::rng());
                while !signals.stop_requested() {
                    let client = clients.pick();
                    let endpoint = client.endpoint();
                    match dist.next() {
                        OpType::Put => {
                            // New version of a key that already exists.
                            let key = {
                                let pool = versions.lock();
                                if pool.is_empty() {
                                    continue;
                                }
                                pool[rng.random_range(0..pool.len())].key.clone()
                            };
                            let size = payload.object_size(&mut rng);
                            let data = payload.payload(&mut rng, size);
                            let start = Utc::now();
                            let result = client.put_object(&bucket, &key, &data).await;
                            let end = Utc::now();
                            match result {
                                Ok(put) => {
                                    versions.lock().push(Version {
                                        key: key.clone(),
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
                            let target = {
                                let mut pool = versions.lock();
                                if pool.is_empty() {
                                    continue;
                                }
                                let i = rng.random_range(0..pool.len());
                                pool.swap_remove(i)
                            };
                            let start = Utc::now();
                            let result = client
                                .remove_object(&bucket, &target.key, target.version_id.as_deref())
                                .await;
                            let end = Utc::now();
                            rec.record(
                                OpType::Delete,
                                endpoint,
                                1,
                                0,
                                Some(target.key),
                                result.err().map(|e| e.to_string()),
                                start,
                                None,
                                end,
                            );
                        }
                        OpType::Stat => {
                            let target = {
                                let pool = versions.lock();
                                if pool.is_empty() {
                                    continue;
                                }
                                pool[rng.random_range(0..pool.len())].clone()
                            };
                            let start = Utc::now();
                            let result = client
                                .stat_object(&bucket, &target.key, target.version_id.as_deref())
                                .await;
                            let end = Utc::now();
                            rec.record(
                                OpType::Stat,
                                endpoint,
                                1,
                                0,
                                Some(target.key),
                                result.err().map(|e| e.to_string()),
                                start,
                                None,
                                end,
                            );
                        }
                        _ => {
                            let target = {
                                let pool = versions.lock();
                                if pool.is_empty() {
                                    continue;
                                }
                                pool[rng.random_range(0..pool.len())].clone()
                            };
                            let start = Utc::now();
                            match client
                                .get_object(&bucket, &target.key, None, target.version_id.as_deref())
                                .await
                            {
                                Ok(fetched) => rec.record(
                                    OpType::Get,
                                    endpoint,
                                    1,
                                    fetched.bytes,
                                    Some(target.key),
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
                                    Some(target.key),
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
        // Remove every version still tracked, then sweep the prefix.
        let targets: Vec<Version> = std::mem::take(&mut *self.pool.lock());
        let client = self.common.pool.pick();
        for target in targets {
            if self.common.clear {
                let _ = client
                    .remove_object(&self.common.bucket, &target.key, target.version_id.as_deref())
                    .await;
            }
        }
        clear_prefix(&self.common).await;
    }
}
