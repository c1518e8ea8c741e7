//! Bulkhead: bounded concurrency per dependency.
//!
//! # Responsibilities
//! - Admit at most `max_concurrent_calls` in-flight calls
//! - Optionally wait a bounded time for a slot to free up
//! - Hand out a RAII [`Permit`] that releases its slot exactly once
//!
//! # Design Decisions
//! - Uses Tokio's semaphore (fair, FIFO waiters)
//! - Release happens on drop, so every exit path (error, timeout, panic,
//!   cancelled future) gives the slot back
//! - An in-use counter mirrors the semaphore; underflow is a fatal bug

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::BulkheadConfig;

/// Returned when no slot became free in time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("bulkhead '{name}' is full ({max_concurrent_calls} concurrent calls)")]
pub struct BulkheadFull {
    pub name: String,
    pub max_concurrent_calls: usize,
}

/// Concurrency compartment for one dependency.
#[derive(Debug)]
pub struct Bulkhead {
    name: String,
    max_concurrent_calls: usize,
    semaphore: Arc<Semaphore>,
    in_use: Arc<AtomicUsize>,
}

impl Bulkhead {
    pub fn new(name: impl Into<String>, config: &BulkheadConfig) -> Self {
        let max_concurrent_calls = config.max_concurrent_calls.max(1);
        Self {
            name: name.into(),
            max_concurrent_calls,
            semaphore: Arc::new(Semaphore::new(max_concurrent_calls)),
            in_use: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Take a slot if one is free right now.
    pub fn try_enter(&self) -> Option<Permit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        Some(self.issue(permit))
    }

    /// Take a slot, waiting up to `timeout` for one to free up.
    pub async fn enter(&self, timeout: Duration) -> Result<Permit, BulkheadFull> {
        if timeout.is_zero() {
            return self.try_enter().ok_or_else(|| self.full());
        }

        match tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(self.issue(permit)),
            // The semaphore is never closed; treat it like a timeout regardless.
            Ok(Err(_)) | Err(_) => Err(self.full()),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max_concurrent_calls(&self) -> usize {
        self.max_concurrent_calls
    }

    /// Calls currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    fn issue(&self, permit: OwnedSemaphorePermit) -> Permit {
        self.in_use.fetch_add(1, Ordering::AcqRel);
        Permit {
            _permit: permit,
            in_use: self.in_use.clone(),
        }
    }

    fn full(&self) -> BulkheadFull {
        tracing::debug!(dependency = %self.name, max = self.max_concurrent_calls, "Bulkhead full");
        BulkheadFull {
            name: self.name.clone(),
            max_concurrent_calls: self.max_concurrent_calls,
        }
    }
}

/// A slot in a [`Bulkhead`].
///
/// When dropped, the slot is released back to the bulkhead.
#[derive(Debug)]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
    in_use: Arc<AtomicUsize>,
}

impl Permit {
    /// Give the slot back. Equivalent to dropping the permit.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let previous = self.in_use.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "bulkhead permit released more than once");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulkhead(max: usize) -> Bulkhead {
        Bulkhead::new(
            "hello",
            &BulkheadConfig {
                max_concurrent_calls: max,
                max_wait_ms: 0,
            },
        )
    }

    #[test]
    fn test_try_enter_respects_limit() {
        let bh = bulkhead(2);
        let p1 = bh.try_enter().unwrap();
        let _p2 = bh.try_enter().unwrap();
        assert!(bh.try_enter().is_none());
        assert_eq!(bh.in_flight(), 2);

        p1.release();
        assert_eq!(bh.available_permits(), 1);
        assert_eq!(bh.in_flight(), 1);
        assert!(bh.try_enter().is_some());
    }

    #[tokio::test]
    async fn test_zero_timeout_fails_immediately() {
        let bh = bulkhead(1);
        let _held = bh.enter(Duration::ZERO).await.unwrap();
        let err = bh.enter(Duration::ZERO).await.unwrap_err();
        assert_eq!(err.max_concurrent_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_waits_for_release() {
        let bh = Arc::new(bulkhead(1));
        let held = bh.enter(Duration::ZERO).await.unwrap();

        let waiter = {
            let bh = bh.clone();
            tokio::spawn(async move { bh.enter(Duration::from_secs(1)).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(held);

        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(bh.available_permits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_times_out() {
        let bh = bulkhead(1);
        let _held = bh.try_enter().unwrap();
        let start = tokio::time::Instant::now();
        assert!(bh.enter(Duration::from_millis(250)).await.is_err());
        assert_eq!(start.elapsed(), Duration::from_millis(250));
        assert_eq!(bh.in_flight(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_limit_under_contention() {
        let bh = Arc::new(bulkhead(3));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let (bh, current, peak) = (bh.clone(), current.clone(), peak.clone());
            tasks.push(tokio::spawn(async move {
                let _permit = bh.enter(Duration::from_secs(5)).await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(bh.available_permits(), 3);
        assert_eq!(bh.in_flight(), 0);
    }
}
