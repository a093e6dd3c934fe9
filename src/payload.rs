//! Random keys and values for the generated batches.

use rand::distributions::{Alphanumeric, Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Per-worker source of random keys and values.
///
/// Every worker owns one of these, so generating a batch never touches shared state.
pub struct PayloadGenerator {
    rng: StdRng,
}

impl PayloadGenerator {
    /// Seeds from OS entropy.
    pub fn new() -> Self {
        PayloadGenerator {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic stream for worker `index` of a run seeded with `seed`.
    pub fn seeded(seed: u64, index: usize) -> Self {
        PayloadGenerator {
            rng: StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
        }
    }

    pub fn for_worker(seed: Option<u64>, index: usize) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed, index),
            None => Self::new(),
        }
    }

    /// Decimal representation of a uniform integer in `[0, bound)`. `bound` must be positive.
    pub fn next_key(&mut self, bound: u64) -> String {
        Uniform::from(0..bound).sample(&mut self.rng).to_string()
    }

    /// `size` random ASCII alphanumeric characters.
    pub fn next_value(&mut self, size: usize) -> String {
        (&mut self.rng)
            .sample_iter(&Alphanumeric)
            .take(size)
            .map(char::from)
            .collect()
    }

    /// `batch_size` fresh key/value pairs.
    pub fn write_batch(
        &mut self,
        batch_size: usize,
        key_space: u64,
        data_size: usize,
    ) -> Vec<(String, String)> {
        (0..batch_size)
            .map(|_| (self.next_key(key_space), self.next_value(data_size)))
            .collect()
    }

    /// `batch_size` fresh keys.
    pub fn read_batch(&mut self, batch_size: usize, key_space: u64) -> Vec<String> {
        (0..batch_size).map(|_| self.next_key(key_space)).collect()
    }
}

impl Default for PayloadGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::PayloadGenerator;

    #[test]
    fn keys_stay_below_bound() {
        let mut gen = PayloadGenerator::seeded(7, 0);
        for _ in 0..10_000 {
            let key: u64 = gen.next_key(13).parse().unwrap();
            assert!(key < 13);
        }
        assert_eq!(gen.next_key(1), "0");
    }

    #[test]
    fn values_have_exact_length() {
        let mut gen = PayloadGenerator::new();
        for size in [0, 1, 100, 4096] {
            let value = gen.next_value(size);
            assert_eq!(value.len(), size);
            assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn seeded_workers_diverge() {
        let a: Vec<_> = {
            let mut gen = PayloadGenerator::seeded(42, 0);
            (0..32).map(|_| gen.next_key(1 << 40)).collect()
        };
        let b: Vec<_> = {
            let mut gen = PayloadGenerator::seeded(42, 1);
            (0..32).map(|_| gen.next_key(1 << 40)).collect()
        };
        let again: Vec<_> = {
            let mut gen = PayloadGenerator::seeded(42, 0);
            (0..32).map(|_| gen.next_key(1 << 40)).collect()
        };
        assert_ne!(a, b);
        assert_eq!(a, again);
    }

    #[test]
    fn batches_have_requested_shape() {
        let mut gen = PayloadGenerator::new();
        let pairs = gen.write_batch(10, 1000, 8);
        assert_eq!(pairs.len(), 10);
        assert!(pairs.iter().all(|(_, v)| v.len() == 8));
        assert_eq!(gen.read_batch(3, 1000).len(), 3);
    }
}
