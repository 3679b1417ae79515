use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Issues time slots to batches of outbound face-provider calls so the
/// process stays under the provider's TPS cap.
///
/// One logical instance exists per process; every reservation is serialized
/// through the internal mutex, so concurrent callers observe a single
/// timeline of slots. State resets on restart, which is safe: an empty
/// `last_batch_end` is equivalent to "no recent calls".
pub struct RateLimiter {
    inner: Mutex<Inner>,
    safe_interval: Duration,
    tps: u32,
}

struct Inner {
    /// Moment the most recently reserved batch's last call is scheduled.
    last_batch_end: Option<Instant>,
}

/// A reserved slot for one batch of provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// How long the caller must wait before issuing the first call.
    pub delay: Duration,
    /// Spacing between consecutive calls within the batch.
    pub interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterStatus {
    /// How far the schedule currently extends past the present.
    pub backlog: Duration,
    pub tps: u32,
    pub interval: Duration,
}

impl RateLimiter {
    /// `safety_factor` scales the usable fraction of `tps`; at 50 TPS and
    /// 0.9 the call spacing comes out to ~23ms.
    #[must_use]
    pub fn new(tps: u32, safety_factor: f64) -> Self {
        let tps = tps.max(1);
        let effective = (f64::from(tps) * safety_factor).max(1.0);
        let safe_interval = Duration::from_millis((1000.0 / effective).ceil() as u64);

        Self {
            inner: Mutex::new(Inner {
                last_batch_end: None,
            }),
            safe_interval,
            tps,
        }
    }

    /// Reserve slots for a batch of `n` calls.
    ///
    /// Batches are linearized: the returned delay places this batch's first
    /// call no earlier than the previously reserved batch's last call.
    pub fn reserve_batch(&self, n: usize) -> Reservation {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        let delay = inner
            .last_batch_end
            .map_or(Duration::ZERO, |end| end.saturating_duration_since(now));

        let slot_start = now + delay;
        inner.last_batch_end = Some(slot_start + self.safe_interval * n as u32);

        Reservation {
            delay,
            interval: self.safe_interval,
        }
    }

    /// Push the schedule out after the provider signalled a throttle.
    ///
    /// The penalty is additive on top of whatever backlog exists and never
    /// shortens the schedule.
    pub fn report_throttle(&self, penalty: Duration) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        let base = match inner.last_batch_end {
            Some(end) if end > now => end,
            _ => now,
        };
        inner.last_batch_end = Some(base + penalty);
    }

    pub fn status(&self) -> RateLimiterStatus {
        let now = Instant::now();
        let inner = self.inner.lock().unwrap();

        let backlog = inner
            .last_batch_end
            .map_or(Duration::ZERO, |end| end.saturating_duration_since(now));

        RateLimiterStatus {
            backlog,
            tps: self.tps,
            interval: self.safe_interval,
        }
    }

    /// Forget all reservations.
    pub fn reset(&self) {
        self.inner.lock().unwrap().last_batch_end = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_batch_starts_immediately() {
        let limiter = RateLimiter::new(50, 0.9);

        let reservation = limiter.reserve_batch(10);

        assert_eq!(reservation.delay, Duration::ZERO);
        assert_eq!(reservation.interval, Duration::from_millis(23));
    }

    #[tokio::test(start_paused = true)]
    async fn batches_are_linearized() {
        let limiter = RateLimiter::new(50, 0.9);

        let first = limiter.reserve_batch(10);
        let second = limiter.reserve_batch(5);

        // The second batch may start only once all ten slots of the first
        // are scheduled.
        assert_eq!(first.delay, Duration::ZERO);
        assert_eq!(second.delay, first.interval * 10);

        let third = limiter.reserve_batch(1);
        assert_eq!(third.delay, first.interval * 15);
    }

    #[tokio::test(start_paused = true)]
    async fn backlog_drains_with_time() {
        let limiter = RateLimiter::new(50, 0.9);

        limiter.reserve_batch(10);
        let backlog = limiter.status().backlog;
        assert_eq!(backlog, Duration::from_millis(230));

        tokio::time::advance(backlog + Duration::from_millis(1)).await;

        assert_eq!(limiter.status().backlog, Duration::ZERO);
        assert_eq!(limiter.reserve_batch(1).delay, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_penalty_is_additive() {
        let limiter = RateLimiter::new(50, 0.9);

        limiter.reserve_batch(10);
        let before = limiter.status().backlog;

        limiter.report_throttle(Duration::from_millis(2000));

        let after = limiter.status().backlog;
        assert_eq!(after, before + Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_penalty_applies_from_now_when_idle() {
        let limiter = RateLimiter::new(50, 0.9);

        limiter.reserve_batch(1);
        tokio::time::advance(Duration::from_secs(60)).await;

        // The old schedule is long in the past; the penalty counts from now.
        limiter.report_throttle(Duration::from_millis(2000));

        assert_eq!(limiter.status().backlog, Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_the_schedule() {
        let limiter = RateLimiter::new(50, 0.9);

        limiter.reserve_batch(100);
        limiter.reset();

        assert_eq!(limiter.status().backlog, Duration::ZERO);
        assert_eq!(limiter.reserve_batch(1).delay, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_has_a_floor() {
        // Degenerate configuration must not divide by zero.
        let limiter = RateLimiter::new(0, 0.0);

        let reservation = limiter.reserve_batch(1);
        assert!(reservation.interval >= Duration::from_millis(1));
    }
}
