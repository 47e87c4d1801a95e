//! Deterministic PRNG and random time-interval sources.
//!
//! Module behaviors draw arrival and service intervals from an
//! [`IntervalSource`]; the engine itself never consumes randomness. The
//! generator is SplitMix64: fast, 8 bytes of state, good statistical
//! properties, and trivially serializable, so a scenario seeded the same way
//! replays identically on every platform.

use crate::time::SimTime;

/// SplitMix64 pseudo-random number generator.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimRng {
    state: u64,
}

impl SimRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate the next `u64` in the sequence.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform draw in `[0, 1)` with 53 bits of precision.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Internal state, for snapshots.
    pub fn state(&self) -> u64 {
        self.state
    }
}

// ---------------------------------------------------------------------------
// Interval sources
// ---------------------------------------------------------------------------

/// An opaque supplier of time intervals, the only randomness interface the
/// bundled modules consume.
pub trait IntervalSource {
    fn next_interval(&mut self, rng: &mut SimRng) -> SimTime;
}

/// Always the same interval. Zero is legal and means "immediately".
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ConstantInterval(pub SimTime);

impl IntervalSource for ConstantInterval {
    fn next_interval(&mut self, _rng: &mut SimRng) -> SimTime {
        self.0
    }
}

/// Uniform draw in `[low, high)`.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct UniformInterval {
    pub low: SimTime,
    pub high: SimTime,
}

impl IntervalSource for UniformInterval {
    fn next_interval(&mut self, rng: &mut SimRng) -> SimTime {
        self.low + (self.high - self.low) * rng.next_f64()
    }
}

/// Exponentially distributed interval with the given mean, drawn by inverse
/// CDF. The draw is clamped away from u=0 so the logarithm stays finite.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ExponentialInterval {
    pub mean: SimTime,
}

impl IntervalSource for ExponentialInterval {
    fn next_interval(&mut self, rng: &mut SimRng) -> SimTime {
        let u = (1.0 - rng.next_f64()).max(f64::EPSILON);
        self.mean * -u.ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_instances() {
        let mut a = SimRng::new(42);
        let mut b = SimRng::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn different_seeds_differ() {
        let mut a = SimRng::new(1);
        let mut b = SimRng::new(2);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn next_f64_in_unit_interval() {
        let mut rng = SimRng::new(7);
        for _ in 0..1_000 {
            let x = rng.next_f64();
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn constant_interval_ignores_rng() {
        let mut rng = SimRng::new(0);
        let mut src = ConstantInterval(SimTime::from_secs(3));
        assert_eq!(src.next_interval(&mut rng), SimTime::from_secs(3));
        assert_eq!(src.next_interval(&mut rng), SimTime::from_secs(3));
    }

    #[test]
    fn uniform_interval_stays_in_range() {
        let mut rng = SimRng::new(99);
        let mut src = UniformInterval {
            low: SimTime::from_secs(2),
            high: SimTime::from_secs(5),
        };
        for _ in 0..1_000 {
            let t = src.next_interval(&mut rng);
            assert!(t >= SimTime::from_secs(2) && t < SimTime::from_secs(5));
        }
    }

    #[test]
    fn exponential_interval_positive_with_plausible_mean() {
        let mut rng = SimRng::new(1234);
        let mut src = ExponentialInterval {
            mean: SimTime::from_secs(10),
        };
        let trials = 10_000;
        let mut total = 0.0;
        for _ in 0..trials {
            let t = src.next_interval(&mut rng);
            assert!(t > SimTime::ZERO);
            total += t.to_f64();
        }
        let mean = total / trials as f64;
        assert!((8.0..12.0).contains(&mean), "expected ~10, got {mean}");
    }
}
