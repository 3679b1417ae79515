use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// How a failed operation should be treated by a queue consumer.
///
/// Every provider, storage and database failure collapses into one of these
/// three kinds; message disposition (ack vs retry) and the backoff curve are
/// a pure function of the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient failure. Retry with the normal exponential backoff.
    Retryable,
    /// Rate-limit signal. Retry with the steeper throttle curve and feed the
    /// pacing back to the rate limiter.
    Throttle,
    /// The operation will never succeed. Ack and record the error.
    Terminal,
}

impl ErrorKind {
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable | Self::Throttle)
    }
}

/// Exponential backoff with jitter for transient failures.
///
/// `attempt` is 1-based: the first retry gets roughly the base delay.
#[must_use]
pub fn backoff_delay(attempt: i32, config: &BackoffConfig) -> Duration {
    jittered(exponential(attempt, config.base, config.cap))
}

/// Backoff for throttle signals. Strictly above [`backoff_delay`] on the
/// first attempt so throttled work drains slower than merely flaky work.
#[must_use]
pub fn throttle_backoff_delay(attempt: i32, config: &BackoffConfig) -> Duration {
    jittered(exponential(attempt, config.throttle_base, config.cap))
}

/// Pick the curve matching the error kind.
#[must_use]
pub fn delay_for(kind: ErrorKind, attempt: i32, config: &BackoffConfig) -> Duration {
    match kind {
        ErrorKind::Throttle => throttle_backoff_delay(attempt, config),
        _ => backoff_delay(attempt, config),
    }
}

fn exponential(attempt: i32, base: Duration, cap: Duration) -> Duration {
    let attempt = attempt.max(1);
    let factor = 2_u32.saturating_pow((attempt - 1).min(30) as u32);
    base.saturating_mul(factor).min(cap)
}

fn jittered(delay: Duration) -> Duration {
    let jitter = rand::rng().random_range(0.8..1.2);
    delay.mul_f64(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(300),
            throttle_base: Duration::from_secs(5),
        }
    }

    #[test]
    fn backoff_is_non_decreasing_up_to_the_cap() {
        let config = config();

        for attempt in 1..=12 {
            let lo = exponential(attempt, config.base, config.cap);
            let hi = exponential(attempt + 1, config.base, config.cap);
            assert!(hi >= lo, "attempt {attempt}: {hi:?} < {lo:?}");
        }
    }

    #[test]
    fn backoff_is_capped() {
        let config = config();

        // 2^(k-1) seconds crosses the 300s cap at k = 10.
        let delay = exponential(20, config.base, config.cap);
        assert_eq!(delay, config.cap);

        // Jitter stays within 20% of the cap.
        let delay = backoff_delay(20, &config);
        assert!(delay >= config.cap.mul_f64(0.8));
        assert!(delay <= config.cap.mul_f64(1.2));
    }

    #[test]
    fn throttle_curve_is_above_normal_curve_at_first_attempt() {
        let config = config();

        // Compare without jitter: worst-case jitter bounds must not overlap.
        let normal = exponential(1, config.base, config.cap);
        let throttle = exponential(1, config.throttle_base, config.cap);

        assert!(throttle.mul_f64(0.8) > normal.mul_f64(1.2));
    }

    #[test]
    fn delays_are_finite_and_positive() {
        let config = config();

        for attempt in [1, 2, 5, 100, i32::MAX] {
            assert!(backoff_delay(attempt, &config) > Duration::ZERO);
            assert!(throttle_backoff_delay(attempt, &config) > Duration::ZERO);
        }
    }

    #[test]
    fn attempts_below_one_are_clamped() {
        let config = config();

        assert_eq!(
            exponential(0, config.base, config.cap),
            exponential(1, config.base, config.cap)
        );
        assert_eq!(
            exponential(-3, config.base, config.cap),
            exponential(1, config.base, config.cap)
        );
    }

    #[test]
    fn kind_picks_the_curve() {
        let config = config();

        // Throttle delays at attempt 1 always exceed normal delays even with
        // adversarial jitter (4s lower bound vs 1.2s upper bound).
        let throttle = delay_for(ErrorKind::Throttle, 1, &config);
        let normal = delay_for(ErrorKind::Retryable, 1, &config);
        assert!(throttle > normal);
    }

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::Retryable.is_retryable());
        assert!(ErrorKind::Throttle.is_retryable());
        assert!(!ErrorKind::Terminal.is_retryable());
    }
}
