//! Backoff strategies applied between a failed attempt and the next one.
//!
//! Attempt semantics: `attempt` is the number of failures recorded so far, so the first retry
//! asks for `delay_for(1)`. Attempt `0` is the initial call and never waits. The default
//! strategy is [`Backoff::none`]: retries happen immediately.
//!
//! ```rust
//! use std::time::Duration;
//! use reroute::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(100))
//!     .with_max(Duration::from_secs(1))
//!     .unwrap();
//! assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
//! assert_eq!(backoff.delay_for(8), Duration::from_secs(1));
//! ```

use std::fmt;
use std::time::Duration;

/// Upper bound for any computed delay (1 hour).
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffError {
    /// `with_max` only makes sense for growing strategies.
    CapOnFixedDelay,
    MaxMustBePositive,
    MaxLessThanBase { base: Duration, max: Duration },
}

impl fmt::Display for BackoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffError::CapOnFixedDelay => {
                write!(f, "with_max is only valid for linear or exponential backoff")
            }
            BackoffError::MaxMustBePositive => write!(f, "max must be greater than zero"),
            BackoffError::MaxLessThanBase { base, max } => {
                write!(f, "max ({:?}) must be >= base ({:?})", max, base)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

/// Pluggable delay schedule consulted by the retry loop.
pub trait BackoffStrategy: Send + Sync + fmt::Debug {
    fn delay_for(&self, attempt: usize) -> Duration;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schedule {
    None,
    Fixed(Duration),
    Linear { base: Duration, max: Option<Duration> },
    Exponential { base: Duration, max: Option<Duration> },
}

fn cap(delay: Duration, max: Option<Duration>) -> Duration {
    max.map(|m| delay.min(m)).unwrap_or(delay).min(MAX_BACKOFF)
}

impl Schedule {
    fn delay_for(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match *self {
            Schedule::None => Duration::ZERO,
            Schedule::Fixed(delay) => delay.min(MAX_BACKOFF),
            Schedule::Linear { base, max } => {
                let factor = attempt.min(u32::MAX as usize) as u32;
                cap(base.checked_mul(factor).unwrap_or(MAX_BACKOFF), max)
            }
            Schedule::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
                let nanos = base.as_nanos().saturating_mul(2u128.saturating_pow(exponent));
                let delay = Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64);
                cap(delay, max)
            }
        }
    }
}

/// Built-in backoff schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    schedule: Schedule,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::none()
    }
}

impl Backoff {
    /// Retry immediately.
    pub fn none() -> Self {
        Self { schedule: Schedule::None }
    }

    /// Same delay before every retry.
    pub fn fixed(delay: Duration) -> Self {
        Self { schedule: Schedule::Fixed(delay) }
    }

    /// `base * attempt`.
    pub fn linear(base: Duration) -> Self {
        Self { schedule: Schedule::Linear { base, max: None } }
    }

    /// `base * 2^(attempt - 1)`.
    pub fn exponential(base: Duration) -> Self {
        Self { schedule: Schedule::Exponential { base, max: None } }
    }

    /// Cap a linear or exponential schedule.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match &mut self.schedule {
            Schedule::Linear { base, max: existing }
            | Schedule::Exponential { base, max: existing } => {
                if max < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max });
                }
                *existing = Some(max);
                Ok(self)
            }
            Schedule::None | Schedule::Fixed(_) => Err(BackoffError::CapOnFixedDelay),
        }
    }

    /// True when retries happen without delay.
    pub fn is_none(&self) -> bool {
        matches!(self.schedule, Schedule::None)
    }

    /// Delay before retry number `attempt`, counting from 1.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        self.schedule.delay_for(attempt)
    }
}

impl BackoffStrategy for Backoff {
    fn delay_for(&self, attempt: usize) -> Duration {
        self.schedule.delay_for(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_no_delay() {
        let backoff = Backoff::default();
        assert!(backoff.is_none());
        assert_eq!(backoff.delay_for(1), Duration::ZERO);
        assert_eq!(backoff.delay_for(50), Duration::ZERO);
    }

    #[test]
    fn initial_call_never_waits() {
        for backoff in [
            Backoff::fixed(Duration::from_millis(50)),
            Backoff::linear(Duration::from_millis(50)),
            Backoff::exponential(Duration::from_millis(50)),
        ] {
            assert_eq!(backoff.delay_for(0), Duration::ZERO);
        }
    }

    #[test]
    fn fixed_delay_is_constant() {
        let backoff = Backoff::fixed(Duration::from_millis(250));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(250));
        assert_eq!(backoff.delay_for(9), Duration::from_millis(250));
    }

    #[test]
    fn linear_grows_by_base() {
        let backoff = Backoff::linear(Duration::from_millis(100));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(300));
    }

    #[test]
    fn exponential_doubles_and_caps() {
        let backoff = Backoff::exponential(Duration::from_millis(100))
            .with_max(Duration::from_millis(500))
            .unwrap();
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
        assert_eq!(backoff.delay_for(4), Duration::from_millis(500));
    }

    #[test]
    fn huge_attempts_saturate() {
        let exp = Backoff::exponential(Duration::from_secs(1));
        assert_eq!(exp.delay_for(1_000_000), MAX_BACKOFF);
        let linear = Backoff::linear(Duration::from_secs(u64::MAX / 4));
        assert_eq!(linear.delay_for(1_000), MAX_BACKOFF);
    }

    #[test]
    fn invalid_caps_are_rejected() {
        assert_eq!(
            Backoff::fixed(Duration::from_secs(1)).with_max(Duration::from_secs(2)),
            Err(BackoffError::CapOnFixedDelay)
        );
        assert_eq!(
            Backoff::linear(Duration::from_secs(1)).with_max(Duration::ZERO),
            Err(BackoffError::MaxMustBePositive)
        );
        assert!(matches!(
            Backoff::exponential(Duration::from_secs(5)).with_max(Duration::from_secs(1)),
            Err(BackoffError::MaxLessThanBase { .. })
        ));
    }
}
