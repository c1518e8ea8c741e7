//! Per-dependency rate limiting with a token bucket.
//!
//! The bucket holds up to `limit_for_period` tokens and refills continuously
//! at `limit_for_period` per `limit_refresh_period`. A waiting caller
//! reserves its token up front (the balance may go negative), so callers are
//! served in reservation order and never over-admitted. A caller that goes
//! away while waiting hands its token back.

use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::config::RateLimiterConfig;

/// Returned when no permit became available within the allowed wait.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("rate limit exceeded for '{name}'")]
pub struct RateLimitExceeded {
    pub name: String,
}

/// A simple token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn refill(&mut self, now: Instant, capacity: f64, refill_rate: f64) {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;
    }

    fn try_acquire(&mut self, now: Instant, capacity: f64, refill_rate: f64) -> bool {
        self.refill(now, capacity, refill_rate);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Reserve one token, returning how long the caller must wait for it.
    /// Nothing is reserved if the wait would exceed `max_wait`.
    fn reserve(&mut self, now: Instant, capacity: f64, refill_rate: f64, max_wait: Duration) -> Option<Duration> {
        self.refill(now, capacity, refill_rate);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Some(Duration::ZERO);
        }

        let deficit = 1.0 - self.tokens;
        let wait = Duration::from_secs_f64(deficit / refill_rate);
        if wait <= max_wait {
            self.tokens -= 1.0;
            Some(wait)
        } else {
            None
        }
    }

    fn refund(&mut self, now: Instant, capacity: f64, refill_rate: f64) {
        self.refill(now, capacity, refill_rate);
        self.tokens = (self.tokens + 1.0).min(capacity);
    }
}

/// A token taken ahead of time; returned to the bucket unless kept.
struct Reservation<'a> {
    limiter: &'a RateLimiter,
    kept: bool,
}

impl Reservation<'_> {
    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.kept {
            let limiter = self.limiter;
            limiter
                .lock()
                .refund(Instant::now(), limiter.capacity, limiter.refill_rate);
            tracing::debug!(dependency = %limiter.name, "Rate limit reservation abandoned");
        }
    }
}

/// Rate limiter guarding one dependency.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    capacity: f64,
    /// Tokens per second.
    refill_rate: f64,
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: &RateLimiterConfig) -> Self {
        let capacity = f64::from(config.limit_for_period.max(1));
        let period = config.refresh_period().as_secs_f64().max(f64::EPSILON);
        Self {
            name: name.into(),
            capacity,
            refill_rate: capacity / period,
            bucket: Mutex::new(TokenBucket::new(capacity, Instant::now())),
        }
    }

    /// Take a permit if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        self.lock().try_acquire(now, self.capacity, self.refill_rate)
    }

    /// Take a permit, waiting up to `timeout` for the next refill.
    ///
    /// Fails immediately when the permit cannot be available within `timeout`.
    pub async fn acquire(&self, timeout: Duration) -> Result<(), RateLimitExceeded> {
        let now = Instant::now();
        let wait = self
            .lock()
            .reserve(now, self.capacity, self.refill_rate, timeout);

        match wait {
            Some(wait) if wait.is_zero() => Ok(()),
            Some(wait) => {
                let reservation = Reservation {
                    limiter: self,
                    kept: false,
                };
                tracing::debug!(dependency = %self.name, wait = ?wait, "Waiting for rate limit permit");
                tokio::time::sleep_until(now + wait).await;
                reservation.keep();
                Ok(())
            }
            None => Err(RateLimitExceeded {
                name: self.name.clone(),
            }),
        }
    }

    /// Whole permits available right now (negative when callers are waiting).
    pub fn available_permits(&self) -> i64 {
        let now = Instant::now();
        let mut bucket = self.lock();
        bucket.refill(now, self.capacity, self.refill_rate);
        bucket.tokens.floor() as i64
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TokenBucket> {
        self.bucket.lock().expect("rate limiter mutex poisoned")
    }
}
