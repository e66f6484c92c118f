//! Backoff schedules for remote calls.
//!
//! A call is attempted once, then retried up to [`RetryStrategyConfig::retries`]
//! more times when the failure is [`FaultClass::Transient`]. Rejections
//! are never retried.
//!
//! # Example
//!
//! ```
//! use courier_retry::{RetryStrategyConfig, calculate_delay};
//! use std::time::Duration;
//!
//! let config = RetryStrategyConfig::default();
//! assert_eq!(config.total_attempts(), 4);
//! assert_eq!(calculate_delay(&config, 1), Duration::from_millis(500));
//! assert_eq!(calculate_delay(&config, 2), Duration::from_secs(1));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Retry with no pause.
    Immediate,
    /// Delay doubles after every failed attempt (default).
    #[default]
    Exponential,
    /// Delay grows by `base_delay` after every failed attempt.
    Linear,
    /// Same delay every time.
    Constant,
}

/// Retry settings for one class of remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryStrategyConfig {
    pub strategy: BackoffStrategy,
    /// Additional attempts after the first one.
    pub retries: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// 0.0 disables jitter; 0.5 spreads each delay over 50%..150%.
    pub jitter: f64,
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
        }
    }
}

impl RetryStrategyConfig {
    /// Build a config with the default schedule and the given retry count.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            retries,
            ..Self::default()
        }
    }

    pub fn total_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// The pauses taken between attempts when every attempt fails.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.retries).map(move |attempt| calculate_delay(self, attempt))
    }
}

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultClass {
    /// Connection refused, reset or timed out. The remote side never answered.
    Transient,
    /// The remote side answered and said no, or the failure is local.
    Rejected,
}

impl FaultClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, FaultClass::Transient)
    }
}

/// Delay to wait after the `attempt`-th failure (1-indexed).
///
/// ```
/// use courier_retry::{BackoffStrategy, RetryStrategyConfig, calculate_delay};
/// use std::time::Duration;
///
/// let config = RetryStrategyConfig {
///     strategy: BackoffStrategy::Linear,
///     base_delay: Duration::from_secs(1),
///     ..Default::default()
/// };
/// assert_eq!(calculate_delay(&config, 3), Duration::from_secs(3));
/// ```
pub fn calculate_delay(config: &RetryStrategyConfig, attempt: u32) -> Duration {
    let delay = match config.strategy {
        BackoffStrategy::Immediate => Duration::ZERO,
        BackoffStrategy::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        BackoffStrategy::Linear => config.base_delay.saturating_mul(attempt.max(1)),
        BackoffStrategy::Constant => config.base_delay,
    };

    let capped = delay.min(config.max_delay);
    if config.jitter > 0.0 {
        apply_jitter(capped, config.jitter.min(1.0))
    } else {
        capped
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    let random_value: f64 = rand::random();
    let factor = 1.0 - jitter + random_value * 2.0 * jitter;
    let millis = (delay.as_millis() as f64 * factor).round().max(0.0) as u64;
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_doubles_from_half_a_second() {
        let config = RetryStrategyConfig::default();
        let delays: Vec<_> = config.schedule().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
            ]
        );
        assert_eq!(config.total_attempts(), 4);
    }

    #[test]
    fn zero_retries_means_one_attempt_and_empty_schedule() {
        let config = RetryStrategyConfig::with_retries(0);
        assert_eq!(config.total_attempts(), 1);
        assert_eq!(config.schedule().count(), 0);
    }

    #[test]
    fn exponential_delay_is_capped() {
        let config = RetryStrategyConfig {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(30),
            ..Default::default()
        };
        assert_eq!(calculate_delay(&config, 2), Duration::from_secs(20));
        assert_eq!(calculate_delay(&config, 3), Duration::from_secs(30));
        assert_eq!(calculate_delay(&config, 40), Duration::from_secs(30));
    }

    #[test]
    fn immediate_and_constant_strategies() {
        let immediate = RetryStrategyConfig {
            strategy: BackoffStrategy::Immediate,
            ..Default::default()
        };
        assert_eq!(calculate_delay(&immediate, 3), Duration::ZERO);

        let constant = RetryStrategyConfig {
            strategy: BackoffStrategy::Constant,
            base_delay: Duration::from_secs(2),
            ..Default::default()
        };
        assert_eq!(calculate_delay(&constant, 1), Duration::from_secs(2));
        assert_eq!(calculate_delay(&constant, 9), Duration::from_secs(2));
    }

    #[test]
    fn jitter_stays_within_band() {
        let config = RetryStrategyConfig {
            strategy: BackoffStrategy::Constant,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            jitter: 0.5,
            retries: 3,
        };
        for _ in 0..100 {
            let delay = calculate_delay(&config, 1);
            assert!(delay >= Duration::from_secs(5));
            assert!(delay <= Duration::from_secs(15));
        }
    }

    #[test]
    fn only_transient_faults_retry() {
        assert!(FaultClass::Transient.is_retryable());
        assert!(!FaultClass::Rejected.is_retryable());
    }

    #[test]
    fn config_reads_humantime_durations() {
        let config: RetryStrategyConfig =
            serde_json::from_str(r#"{"retries": 2, "base_delay": "250ms"}"#).expect("parse");
        assert_eq!(config.retries, 2);
        assert_eq!(config.base_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.strategy, BackoffStrategy::Exponential);
    }

    mod property {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn delay_never_exceeds_cap(
                base_ms in 0u64..5_000,
                max_ms in 0u64..60_000,
                attempt in 1u32..64,
            ) {
                let config = RetryStrategyConfig {
                    base_delay: Duration::from_millis(base_ms),
                    max_delay: Duration::from_millis(max_ms),
                    ..Default::default()
                };
                prop_assert!(calculate_delay(&config, attempt) <= config.max_delay);
            }

            #[test]
            fn exponential_schedule_is_non_decreasing(retries in 0u32..12) {
                let config = RetryStrategyConfig::with_retries(retries);
                let delays: Vec<_> = config.schedule().collect();
                prop_assert_eq!(delays.len() as u32, retries);
                prop_assert!(delays.windows(2).all(|w| w[0] <= w[1]));
            }
        }
    }
}
