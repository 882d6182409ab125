// src/distribution.rs
//
// Materialized operation schedule for mixed workloads.
//
// The schedule is a finite, pre-built sequence of op-type tokens rather than
// a per-step sampler: identical seeds produce identical schedules on every
// follower, and the empirical fraction of each op type deviates from its
// configured weight by at most 1/N (largest-remainder apportionment).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::ConfigError;
use crate::record::OpType;

pub struct MixedDistribution {
    weights: BTreeMap<OpType, f64>,
    schedule: Vec<OpType>,
    cursor: AtomicUsize,
}

impl MixedDistribution {
    /// Materialize a schedule of `n` entries from non-negative weights.
    ///
    /// At least one weight must be positive. `seed` fixes the shuffle so
    /// distributed participants can build identical schedules.
    pub fn generate(
        weights: BTreeMap<OpType, f64>,
        n: usize,
        seed: u64,
    ) -> Result<MixedDistribution, ConfigError> {
        if n == 0 {
            return Err(ConfigError::InvalidConfig(
                "distribution schedule length must be > 0".into(),
            ));
        }
        let total: f64 = weights.values().sum();
        if total <= 0.0 || weights.values().any(|w| *w < 0.0) {
            return Err(ConfigError::InvalidConfig(
                "operation weights must be non-negative and sum > 0".into(),
            ));
        }

        // Largest-remainder apportionment: floor every quota, then hand the
        // leftover slots to the largest fractional parts.
        let mut counts: Vec<(OpType, usize, f64)> = weights
            .iter()
            .filter(|(_, w)| **w > 0.0)
            .map(|(t, w)| {
                let exact = w / total * n as f64;
                (*t, exact.floor() as usize, exact.fract())
            })
            .collect();
        let assigned: usize = counts.iter().map(|(_, c, _)| *c).sum();
        let mut remaining = n - assigned;
        counts.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        for entry in counts.iter_mut() {
            if remaining == 0 {
                break;
            }
            entry.1 += 1;
            remaining -= 1;
        }

        let mut schedule = Vec::with_capacity(n);
        for (t, c, _) in &counts {
            schedule.extend(std::iter::repeat_n(*t, *c));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        schedule.shuffle(&mut rng);

        Ok(MixedDistribution {
            weights,
            schedule,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Next op type; the schedule wraps around.
    pub fn next(&self) -> OpType {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.schedule[i % self.schedule.len()]
    }

    pub fn len(&self) -> usize {
        self.schedule.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedule.is_empty()
    }

    pub fn weight(&self, t: OpType) -> f64 {
        self.weights.get(&t).copied().unwrap_or(0.0)
    }

    /// Fraction of the schedule occupied by `t`.
    pub fn empirical_fraction(&self, t: OpType) -> f64 {
        let count = self.schedule.iter().filter(|s| **s == t).count();
        count as f64 / self.schedule.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(pairs: &[(OpType, f64)]) -> BTreeMap<OpType, f64> {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn test_fraction_within_one_over_n() {
        let w = weights(&[
            (OpType::Get, 45.0),
            (OpType::Stat, 30.0),
            (OpType::Put, 15.0),
            (OpType::Delete, 10.0),
        ]);
        let n = 5000;
        let dist = MixedDistribution::generate(w.clone(), n, 42).unwrap();
        assert_eq!(dist.len(), n);
        let total: f64 = w.values().sum();
        for (t, weight) in &w {
            let want = weight / total;
            let got = dist.empirical_fraction(*t);
            assert!(
                (got - want).abs() <= 1.0 / n as f64 + f64::EPSILON,
                "{t}: want {want}, got {got}"
            );
        }
    }

    #[test]
    fn test_deterministic_under_seed() {
        let w = weights(&[(OpType::Get, 60.0), (OpType::Put, 40.0)]);
        let a = MixedDistribution::generate(w.clone(), 1000, 7).unwrap();
        let b = MixedDistribution::generate(w, 1000, 7).unwrap();
        for _ in 0..1000 {
            assert_eq!(a.next(), b.next());
        }
    }

    #[test]
    fn test_rejects_bad_weights() {
        assert!(MixedDistribution::generate(BTreeMap::new(), 100, 0).is_err());
        let w = weights(&[(OpType::Get, 0.0)]);
        assert!(MixedDistribution::generate(w, 100, 0).is_err());
        let w = weights(&[(OpType::Get, -1.0), (OpType::Put, 2.0)]);
        assert!(MixedDistribution::generate(w, 100, 0).is_err());
    }

    #[test]
    fn test_zero_weight_absent_from_schedule() {
        let w = weights(&[(OpType::Get, 10.0), (OpType::Delete, 0.0)]);
        let dist = MixedDistribution::generate(w, 100, 1).unwrap();
        assert_eq!(dist.empirical_fraction(OpType::Delete), 0.0);
    }
}
