// src/lib.rs

use rand::distr::Alphanumeric;
use rand::Rng;

pub mod aggregate;
pub mod autoterm;
pub mod bench;
pub mod client;
pub mod codec;
pub mod compare;
pub mod config;
pub mod coordinator;
pub mod distribution;
pub mod follower;
pub mod generator;
pub mod live;
pub mod monitor;
pub mod protocol;
pub mod record;
pub mod s3;

/// Pseudorandom ASCII identifier of length `n`; never for key material.
pub fn rand_ascii(n: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(n)
        .map(char::from)
        .collect()
}
