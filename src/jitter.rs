//! Randomization applied on top of a backoff delay.
//!
//! - `None`: use the backoff delay as-is (default).
//! - `Full`: uniform in `[0, delay]`.
//! - `Equal`: uniform in `[delay/2, delay]`.

use rand::{rng, Rng};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Jitter {
    #[default]
    None,
    Full,
    Equal,
}

impl Jitter {
    /// Create a full jitter strategy.
    pub fn full() -> Self {
        Jitter::Full
    }

    /// Create an equal jitter strategy.
    pub fn equal() -> Self {
        Jitter::Equal
    }

    /// Apply jitter using the thread-local RNG.
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    /// Apply jitter with a caller-provided RNG.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let millis: u64 = delay.as_millis().try_into().unwrap_or(u64::MAX);
        match self {
            Jitter::None => delay,
            _ if millis == 0 => Duration::ZERO,
            Jitter::Full => Duration::from_millis(rng.random_range(0..=millis)),
            Jitter::Equal => Duration::from_millis(rng.random_range(millis / 2..=millis)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn none_is_identity() {
        let d = Duration::from_millis(123);
        assert_eq!(Jitter::None.apply(d), d);
    }

    #[test]
    fn full_stays_within_delay() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let d = Jitter::full().apply_with_rng(Duration::from_millis(100), &mut rng);
            assert!(d <= Duration::from_millis(100));
        }
    }

    #[test]
    fn equal_keeps_half_floor() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let d = Jitter::equal().apply_with_rng(Duration::from_millis(100), &mut rng);
            assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(100));
        }
    }

    #[test]
    fn zero_delay_stays_zero() {
        assert_eq!(Jitter::full().apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(Jitter::equal().apply(Duration::ZERO), Duration::ZERO);
    }
}
