//! Adaptive, shared send-rate limiter.
//!
//! One limiter per job. Every send attempt holds the single slot; the slot is
//! handed out no sooner than `delay` after the previous holder released it.
//! `delay` shrinks slowly on success and grows on rate-limit outcomes.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;

#[derive(Debug, Default)]
struct Slot {
    last_release: Option<Instant>,
}

/// Exclusive ownership of the send slot.
///
/// Dropping the permit releases the slot, so a cancelled or panicking send
/// still frees it.
#[derive(Debug)]
pub struct SendPermit {
    slot: OwnedMutexGuard<Slot>,
}

impl SendPermit {
    /// Record the current time as the last send and free the slot.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SendPermit {
    fn drop(&mut self) {
        self.slot.last_release = Some(Instant::now());
    }
}

/// Shared limiter state.
#[derive(Debug)]
pub struct RateLimiter {
    min_ms: f64,
    max_ms: f64,
    decay: f64,
    growth: f64,
    delay_ms: Mutex<f64>,
    slot: Arc<AsyncMutex<Slot>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let min_ms = config.min_delay.as_millis() as f64;
        let max_ms = (config.max_delay.as_millis() as f64).max(min_ms);
        let initial = (config.initial_delay.as_millis() as f64).clamp(min_ms, max_ms);

        Self {
            min_ms,
            max_ms,
            decay: config.decay,
            growth: config.growth,
            delay_ms: Mutex::new(initial),
            slot: Arc::new(AsyncMutex::new(Slot::default())),
        }
    }

    /// Current spacing between sends.
    pub fn delay(&self) -> Duration {
        millis_to_duration(self.delay_millis())
    }

    pub fn delay_millis(&self) -> f64 {
        *self.delay_ms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the slot, then until `delay` has passed since the last release.
    ///
    /// Waiters are served in FIFO order. `delay` is re-read after the sleep, so
    /// a backoff decided by another worker while we slept still applies.
    pub async fn acquire(&self) -> SendPermit {
        let slot = self.slot.clone().lock_owned().await;

        if let Some(last) = slot.last_release {
            loop {
                let ready_at = last + self.delay();
                if Instant::now() >= ready_at {
                    break;
                }
                tokio::time::sleep_until(ready_at).await;
            }
        }

        SendPermit { slot }
    }

    /// Speed up after a successful send.
    pub fn adjust_down(&self) -> Duration {
        self.update(|delay| delay * self.decay)
    }

    /// Slow down after a rate-limit outcome.
    ///
    /// A server hint never lowers the delay; without one the delay grows by
    /// the configured factor.
    pub fn adjust_up(&self, hint: Option<Duration>) -> Duration {
        self.update(|delay| match hint {
            Some(hint) => delay.max(hint.as_millis() as f64),
            None => delay * self.growth,
        })
    }

    fn update(&self, f: impl FnOnce(f64) -> f64) -> Duration {
        let mut delay = self.delay_ms.lock().unwrap_or_else(PoisonError::into_inner);
        let before = *delay;
        let next = f(before);
        *delay = if next.is_finite() {
            next.clamp(self.min_ms, self.max_ms)
        } else {
            self.max_ms
        };
        debug!(from_ms = before, to_ms = *delay, "send delay adjusted");
        millis_to_duration(*delay)
    }
}

fn millis_to_duration(ms: f64) -> Duration {
    Duration::from_micros((ms * 1000.0).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(initial: u64, min: u64, max: u64) -> RateLimitConfig {
        RateLimitConfig {
            initial_delay: Duration::from_millis(initial),
            min_delay: Duration::from_millis(min),
            max_delay: Duration::from_millis(max),
            ..RateLimitConfig::default()
        }
    }

    #[test]
    fn initial_delay_is_clamped_into_bounds() {
        let limiter = RateLimiter::new(&config(10, 100, 1000));
        assert_eq!(limiter.delay_millis(), 100.0);

        let limiter = RateLimiter::new(&config(5000, 100, 1000));
        assert_eq!(limiter.delay_millis(), 1000.0);
    }

    #[test]
    fn success_decays_by_three_percent() {
        let limiter = RateLimiter::new(&config(1000, 100, 10_000));
        limiter.adjust_down();
        assert!((limiter.delay_millis() - 970.0).abs() < 1e-9);
    }

    #[test]
    fn rate_limit_without_hint_grows_by_half() {
        let limiter = RateLimiter::new(&config(1000, 100, 10_000));
        limiter.adjust_up(None);
        assert!((limiter.delay_millis() - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn hint_raises_but_never_lowers() {
        let limiter = RateLimiter::new(&config(1000, 100, 10_000));

        limiter.adjust_up(Some(Duration::from_secs(2)));
        assert_eq!(limiter.delay_millis(), 2000.0);

        limiter.adjust_up(Some(Duration::from_millis(500)));
        assert_eq!(limiter.delay_millis(), 2000.0);
    }

    #[test]
    fn hint_is_capped_at_max() {
        let limiter = RateLimiter::new(&config(1000, 100, 3000));
        limiter.adjust_up(Some(Duration::from_secs(60)));
        assert_eq!(limiter.delay(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn first_acquire_is_immediate() {
        let limiter = RateLimiter::new(&config(1000, 100, 10_000));
        let start = Instant::now();
        limiter.acquire().await.release();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_delay_after_release() {
        let limiter = RateLimiter::new(&config(1000, 100, 10_000));
        limiter.acquire().await.release();

        let start = Instant::now();
        limiter.acquire().await.release();
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn slot_is_exclusive_across_tasks() {
        let limiter = Arc::new(RateLimiter::new(&config(100, 100, 10_000)));
        let held = limiter.acquire().await;

        let contender = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let start = Instant::now();
                limiter.acquire().await.release();
                start.elapsed()
            })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        held.release();

        let waited = contender.await.unwrap();
        // 500ms held by us plus the 100ms spacing after our release.
        assert!(waited >= Duration::from_millis(600));
    }

    #[derive(Debug, Clone)]
    enum Outcome {
        Success,
        Limited(Option<u64>),
    }

    fn outcome() -> impl Strategy<Value = Outcome> {
        prop_oneof![
            Just(Outcome::Success),
            Just(Outcome::Limited(None)),
            (0u64..120_000).prop_map(|ms| Outcome::Limited(Some(ms))),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: no sequence of outcomes moves the delay outside its bounds.
        #[test]
        fn delay_stays_within_bounds(
            min in 1u64..2_000,
            span in 0u64..60_000,
            initial in 0u64..100_000,
            outcomes in prop::collection::vec(outcome(), 0..200),
        ) {
            let max = min + span;
            let limiter = RateLimiter::new(&config(initial, min, max));

            for o in outcomes {
                match o {
                    Outcome::Success => { limiter.adjust_down(); }
                    Outcome::Limited(hint) => { limiter.adjust_up(hint.map(Duration::from_millis)); }
                }
                let d = limiter.delay_millis();
                prop_assert!(d >= min as f64 && d <= max as f64, "delay {} outside [{}, {}]", d, min, max);
            }
        }
    }
}
