//! Per-key failure backoff with exponential growth and jitter
//!
//! Each consecutive failure of a key doubles its redelivery delay, starting
//! at [`BackoffConfig::base_delay`] and capped at [`BackoffConfig::max_delay`].
//! Jitter spreads keys that failed together so they do not retry in lockstep.

use std::time::Duration;

use rand::Rng;

/// Base delay for the first retry of a failing key
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Upper bound on any retry delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Configuration for redelivering keys whose reconcile failed
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure
    pub multiplier: f64,
    /// Randomize each delay to 0.5x..1.5x
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// Fixed-step config without jitter, for tests and tight loops
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Delay before redelivering a key that has failed `failures` times in a row
    ///
    /// `failures` counts from 1; zero is treated as one.
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(64) as i32;
        let max = self.max_delay.as_secs_f64();
        let mut secs = (self.base_delay.as_secs_f64() * self.multiplier.powi(exponent)).min(max);

        if self.jitter {
            secs *= rand::thread_rng().gen_range(0.5..1.5);
        }

        Duration::from_secs_f64(secs.min(max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            jitter: false,
            ..Default::default()
        }
    }

    #[rstest]
    #[case::first_failure(1, Duration::from_millis(5))]
    #[case::zero_is_first(0, Duration::from_millis(5))]
    #[case::second_failure(2, Duration::from_millis(10))]
    #[case::tenth_failure(10, Duration::from_millis(2560))]
    #[case::capped(30, DEFAULT_MAX_DELAY)]
    #[case::huge_count_stays_capped(u32::MAX, DEFAULT_MAX_DELAY)]
    fn delay_doubles_until_capped(#[case] failures: u32, #[case] expected: Duration) {
        let got = no_jitter().delay(failures);
        let diff = got.as_secs_f64() - expected.as_secs_f64();
        assert!(diff.abs() < 1e-6, "failures={failures}: got {got:?}, want {expected:?}");
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = BackoffConfig::default();
        for _ in 0..100 {
            let delay = config.delay(3);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(30));
        }
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let config = BackoffConfig::default();
        for _ in 0..100 {
            assert!(config.delay(40) <= DEFAULT_MAX_DELAY);
        }
    }

    #[test]
    fn fixed_config_ignores_failure_count() {
        let config = BackoffConfig::fixed(Duration::from_millis(1));
        assert_eq!(config.delay(1), Duration::from_millis(1));
        assert_eq!(config.delay(50), Duration::from_millis(1));
    }
}
