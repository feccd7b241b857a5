//! Seeded Mersenne Twister for the resampling enrichment test
//!
//! State is initialised the way R's `set.seed()` does it (an LCG with
//! multiplier 69069 feeding the 624-word state), so a given seed yields the
//! same uniform stream on every platform and thread count.

/// 32-bit Mersenne Twister (MT19937)
pub struct MersenneTwister {
    state: [u32; 624],
    index: usize,
}

impl MersenneTwister {
    const N: usize = 624;
    const M: usize = 397;
    const MATRIX_A: u32 = 0x9908B0DF;
    const UPPER_MASK: u32 = 0x80000000;
    const LOWER_MASK: u32 = 0x7FFFFFFF;
    const TO_UNIT: f64 = 2.3283064365386963e-10;

    pub fn new(seed: u32) -> Self {
        let mut mt = MersenneTwister {
            state: [0; Self::N],
            index: Self::N,
        };
        mt.seed(seed);
        mt
    }

    /// LCG seeding: 50 warm-up steps, one discarded value, then one value
    /// per state word.
    fn seed(&mut self, seed: u32) {
        let mut x: u32 = seed;
        for _ in 0..51 {
            x = x.wrapping_mul(69069).wrapping_add(1);
        }
        for word in self.state.iter_mut() {
            x = x.wrapping_mul(69069).wrapping_add(1);
            *word = x;
        }
        self.index = Self::N;
    }

    fn generate_numbers(&mut self) {
        for i in 0..Self::N {
            let y = (self.state[i] & Self::UPPER_MASK) | (self.state[(i + 1) % Self::N] & Self::LOWER_MASK);
            self.state[i] = self.state[(i + Self::M) % Self::N] ^ (y >> 1);
            if y & 1 != 0 {
                self.state[i] ^= Self::MATRIX_A;
            }
        }
        self.index = 0;
    }

    pub fn next_u32(&mut self) -> u32 {
        if self.index >= Self::N {
            self.generate_numbers();
        }

        let mut y = self.state[self.index];
        self.index += 1;

        // tempering
        y ^= y >> 11;
        y ^= (y << 7) & 0x9D2C5680;
        y ^= (y << 15) & 0xEFC60000;
        y ^= y >> 18;

        y
    }

    /// Uniform draw on the open interval (0, 1)
    pub fn runif(&mut self) -> f64 {
        let u = self.next_u32() as f64 * Self::TO_UNIT;
        if u <= 0.0 {
            0.5 * Self::TO_UNIT
        } else if u >= 1.0 {
            1.0 - 0.5 * Self::TO_UNIT
        } else {
            u
        }
    }

    /// Draw `k` distinct indices with probability proportional to `weights`.
    ///
    /// Uses exponential keys `ln(u) / w` and keeps the `k` largest
    /// (Efraimidis-Spirakis), which is equivalent to sequential weighted
    /// draws without replacement. Zero or non-finite weights are never drawn
    /// unless `k` exceeds the number of positive weights. Indices come back
    /// in ascending order.
    pub fn sample_weighted(&mut self, weights: &[f64], k: usize) -> Vec<usize> {
        let k = k.min(weights.len());
        if k == 0 {
            return Vec::new();
        }
        let mut keys: Vec<(f64, usize)> = weights
            .iter()
            .enumerate()
            .map(|(i, &w)| {
                let u = self.runif();
                let key = if w > 0.0 && w.is_finite() { u.ln() / w } else { f64::NEG_INFINITY };
                (key, i)
            })
            .collect();
        if k < keys.len() {
            keys.select_nth_unstable_by(k - 1, |a, b| b.0.total_cmp(&a.0));
            keys.truncate(k);
        }
        let mut drawn: Vec<usize> = keys.into_iter().map(|(_, i)| i).collect();
        drawn.sort_unstable();
        drawn
    }
}
