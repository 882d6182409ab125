// src/generator.rs
//
// Payload source for upload-style drivers. Body bytes are sliced out of one
// pre-generated random block instead of being generated per request, so
// workers spend their time on I/O rather than on the RNG.

use rand::Rng;

/// Pre-generated block the payloads are cut from.
const BLOCK_SIZE: usize = 4 << 20;

/// Smallest object size allowed when sizes are randomized.
const MIN_RAND_SIZE: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSpec {
    /// Every object is exactly this size.
    Fixed(u64),
    /// Log-uniform between [256, max], approximating a realistic spread of
    /// object sizes around the configured maximum.
    Random { max: u64 },
}

impl SizeSpec {
    pub fn new(size: u64, randomize: bool) -> SizeSpec {
        if randomize {
            SizeSpec::Random { max: size.max(MIN_RAND_SIZE) }
        } else {
            SizeSpec::Fixed(size)
        }
    }

    pub fn max(&self) -> u64 {
        match self {
            SizeSpec::Fixed(n) => *n,
            SizeSpec::Random { max } => *max,
        }
    }

    pub fn is_random(&self) -> bool {
        matches!(self, SizeSpec::Random { .. })
    }
}

pub struct PayloadSource {
    spec: SizeSpec,
    block: Vec<u8>,
}

impl PayloadSource {
    pub fn new(spec: SizeSpec) -> PayloadSource {
        let mut block = vec![0u8; BLOCK_SIZE];
        rand::rng().fill(&mut block[..]);
        PayloadSource { spec, block }
    }

    pub fn spec(&self) -> SizeSpec {
        self.spec
    }

    /// Next object size according to the spec.
    pub fn object_size<R: Rng>(&self, rng: &mut R) -> u64 {
        match self.spec {
            SizeSpec::Fixed(n) => n,
            SizeSpec::Random { max } => {
                let lo = (MIN_RAND_SIZE as f64).ln();
                let hi = (max as f64).ln();
                let v = rng.random_range(lo..=hi).exp() as u64;
                v.clamp(MIN_RAND_SIZE, max)
            }
        }
    }

    /// Produce `size` bytes cut from the random block at a random offset.
    pub fn payload<R: Rng>(&self, rng: &mut R, size: u64) -> Vec<u8> {
        let size = size as usize;
        let mut out = Vec::with_capacity(size);
        let mut off = rng.random_range(0..self.block.len());
        while out.len() < size {
            let take = (size - out.len()).min(self.block.len() - off);
            out.extend_from_slice(&self.block[off..off + take]);
            off = 0;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_size() {
        let src = PayloadSource::new(SizeSpec::new(1024, false));
        let mut rng = rand::rng();
        assert_eq!(src.object_size(&mut rng), 1024);
        assert_eq!(src.payload(&mut rng, 1024).len(), 1024);
    }

    #[test]
    fn test_random_size_bounds() {
        let src = PayloadSource::new(SizeSpec::new(1 << 20, true));
        let mut rng = rand::rng();
        for _ in 0..1000 {
            let n = src.object_size(&mut rng);
            assert!((256..=1 << 20).contains(&n), "size {n} out of bounds");
        }
    }

    #[test]
    fn test_payload_larger_than_block() {
        let src = PayloadSource::new(SizeSpec::new(9 << 20, false));
        let mut rng = rand::rng();
        assert_eq!(src.payload(&mut rng, 9 << 20).len(), 9 << 20);
    }
}
