//! Injectable random-number source.
//!
//! Every random draw in the simulator — fault site, bit position, target
//! row, transient cycle, randomized test data — flows through a [`SimRng`]
//! handle so tests can seed deterministically. Production callers seed from
//! entropy once per simulator instance.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::numeric::bits::mask64;

/// Seedable RNG handle owned by a simulator instance.
#[derive(Debug)]
pub struct SimRng {
    inner: StdRng,
}

impl SimRng {
    /// Create a deterministically seeded RNG.
    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: StdRng::seed_from_u64(seed),
        }
    }

    /// Create an RNG seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self {
            inner: StdRng::from_entropy(),
        }
    }

    /// 64 uniformly random bits.
    pub fn random_bits(&mut self) -> u64 {
        self.inner.gen()
    }

    /// Uniform draw from `0..n`. `n` must be nonzero.
    pub fn pick(&mut self, n: usize) -> usize {
        self.inner.gen_range(0..n)
    }

    /// Weighted draw: returns an index into `weights` with probability
    /// proportional to its weight. The weights must not all be zero.
    pub fn weighted_pick(&mut self, weights: &[usize]) -> usize {
        let total: usize = weights.iter().sum();
        debug_assert!(total > 0);
        let mut draw = self.inner.gen_range(0..total);
        for (index, w) in weights.iter().enumerate() {
            if draw < *w {
                return index;
            }
            draw -= w;
        }
        weights.len() - 1
    }

    /// Random double with a uniformly distributed exponent in
    /// `[exp_min, exp_max]`, a uniform mantissa, a uniform sign, and
    /// probability `fraction_zero` of being exactly zero.
    ///
    /// The exponent bounds are unbiased powers of two; the biased exponent
    /// stored in the result is `exp + 1023`.
    pub fn random_double(&mut self, exp_min: i32, exp_max: i32, fraction_zero: f32) -> f64 {
        debug_assert!(exp_min <= exp_max);

        if self.inner.gen::<f32>() < fraction_zero {
            return 0.0;
        }

        let sign: u64 = if self.inner.gen::<bool>() { 1 } else { 0 };
        let exp_offset = self.inner.gen_range(0..=(exp_max - exp_min)) as i64;
        let exponent = (exp_min as i64 + 1023 + exp_offset) as u64;
        let mantissa = self.random_bits() & mask64(52);

        f64::from_bits((sign << 63) | (exponent << 52) | mantissa)
    }
}
