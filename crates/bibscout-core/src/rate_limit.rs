//! Request pacing for rate-sensitive provider calls.
//!
//! Delays are modeled as an explicit [`Pacing`] policy passed into each
//! provider instance rather than inline sleeps, so unrelated providers pace
//! independently and tests run with [`Pacing::none`] at zero delay.

use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

/// Type alias for governor's direct rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Pacing policy for one provider instance.
pub struct Pacing {
    limiter: Option<DirectLimiter>,
    jitter: Option<(Duration, Duration)>,
    /// Total attempts allowed when a bot-challenge page appears (the first
    /// attempt plus retries).
    pub max_attempts: u32,
    /// Fixed wait before the bot-challenge retry.
    pub challenge_delay: Duration,
}

impl Pacing {
    /// Minimum fixed gap between requests (structured-API providers).
    pub fn fixed(period: Duration) -> Self {
        let limiter = Quota::with_period(period).map(|q| DirectLimiter::direct(q));
        Self {
            limiter,
            jitter: None,
            max_attempts: 2,
            challenge_delay: Duration::ZERO,
        }
    }

    /// Randomized delay in `[wait_min, wait_max]` between page actions
    /// (the scraping fallback provider).
    pub fn jittered(wait_min: Duration, wait_max: Duration) -> Self {
        let (lo, hi) = if wait_min <= wait_max {
            (wait_min, wait_max)
        } else {
            (wait_max, wait_min)
        };
        Self {
            limiter: None,
            jitter: Some((lo, hi)),
            max_attempts: 2,
            challenge_delay: Duration::from_secs(5),
        }
    }

    /// Zero-delay policy for tests.
    pub fn none() -> Self {
        Self {
            limiter: None,
            jitter: None,
            max_attempts: 2,
            challenge_delay: Duration::ZERO,
        }
    }

    /// Wait until the policy allows the next request.
    pub async fn pause(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        if let Some((lo, hi)) = self.jitter {
            let span = hi.saturating_sub(lo);
            let delay = lo + span.mul_f64(fastrand::f64());
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Fixed wait before retrying past a bot-challenge page.
    pub async fn challenge_wait(&self) {
        if self.challenge_delay > Duration::ZERO {
            tokio::time::sleep(self.challenge_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_none_is_immediate() {
        let pacing = Pacing::none();
        let start = Instant::now();
        pacing.pause().await;
        pacing.challenge_wait().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_jitter_stays_in_range() {
        let pacing = Pacing::jittered(Duration::from_millis(1), Duration::from_millis(5));
        let start = Instant::now();
        pacing.pause().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_fixed_spaces_requests() {
        let pacing = Pacing::fixed(Duration::from_millis(20));
        let start = Instant::now();
        pacing.pause().await; // first token is free
        pacing.pause().await; // second waits out the period
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
