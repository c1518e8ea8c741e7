//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: a bounded number of trial calls probe recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure rate over the sliding window exceeds the threshold
//!                (once the minimum number of calls has been recorded)
//! Open → Half-Open: first allow() after the open cool-down
//! Half-Open → Closed: every trial call succeeds
//! Half-Open → Open: any trial call fails or times out
//! ```
//!
//! # Design Decisions
//! - Per-dependency circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - One mutex per breaker guards all counters, so no outcome is double-counted
//! - Every transition starts a new generation; a [`CallPermission`] only
//!   counts in the generation that issued it, so late outcomes are ignored

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::{CircuitBreakerConfig, SlidingWindowType};
use crate::observability::metrics;
use crate::resilience::CallOutcome;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Proof that [`CircuitBreaker::allow`] admitted a call.
///
/// Hand it back to [`CircuitBreaker::record_outcome`] exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "an admitted call must record its outcome"]
pub struct CallPermission {
    generation: u64,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    /// Failed calls in the current window (or trial failures while half-open).
    pub failure_count: u32,
    /// Successful calls in the current window (or trial successes while half-open).
    pub success_count: u32,
    /// Failure percentage over the window, if any calls are buffered.
    pub failure_rate: Option<f64>,
    /// Oldest instant the window still covers.
    pub window_start: Instant,
    pub last_transition: Instant,
    /// Calls refused since the breaker was created.
    pub not_permitted_calls: u64,
}

impl CircuitSnapshot {
    pub fn buffered_calls(&self) -> u32 {
        self.failure_count + self.success_count
    }
}

/// Recent outcomes the failure rate is computed over.
#[derive(Debug)]
enum SlidingWindow {
    Count {
        size: usize,
        outcomes: VecDeque<bool>,
        failures: u32,
        started: Instant,
    },
    Time {
        span: Duration,
        outcomes: VecDeque<(Instant, bool)>,
    },
}

impl SlidingWindow {
    fn new(config: &CircuitBreakerConfig, now: Instant) -> Self {
        let size = config.sliding_window_size.max(1);
        match config.sliding_window_type {
            SlidingWindowType::CountBased => SlidingWindow::Count {
                size: size as usize,
                outcomes: VecDeque::with_capacity(size as usize),
                failures: 0,
                started: now,
            },
            SlidingWindowType::TimeBased => SlidingWindow::Time {
                span: Duration::from_secs(u64::from(size)),
                outcomes: VecDeque::new(),
            },
        }
    }

    fn record(&mut self, now: Instant, failed: bool) {
        match self {
            SlidingWindow::Count {
                size,
                outcomes,
                failures,
                ..
            } => {
                if outcomes.len() == *size {
                    if let Some(true) = outcomes.pop_front() {
                        *failures -= 1;
                    }
                }
                outcomes.push_back(failed);
                if failed {
                    *failures += 1;
                }
            }
            SlidingWindow::Time { outcomes, .. } => {
                outcomes.push_back((now, failed));
                self.evict(now);
            }
        }
    }

    fn evict(&mut self, now: Instant) {
        if let SlidingWindow::Time { span, outcomes } = self {
            while let Some((at, _)) = outcomes.front() {
                if now.duration_since(*at) > *span {
                    outcomes.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// (total, failed) calls currently in the window.
    fn counts(&mut self, now: Instant) -> (u32, u32) {
        self.evict(now);
        match self {
            SlidingWindow::Count {
                outcomes, failures, ..
            } => (outcomes.len() as u32, *failures),
            SlidingWindow::Time { outcomes, .. } => {
                let failed = outcomes.iter().filter(|(_, failed)| *failed).count();
                (outcomes.len() as u32, failed as u32)
            }
        }
    }

    fn start(&self, now: Instant) -> Instant {
        match self {
            SlidingWindow::Count { started, .. } => *started,
            SlidingWindow::Time { span, outcomes } => outcomes
                .front()
                .map(|(at, _)| *at)
                .unwrap_or_else(|| now.checked_sub(*span).unwrap_or(now)),
        }
    }

    fn reset(&mut self, now: Instant) {
        match self {
            SlidingWindow::Count {
                outcomes,
                failures,
                started,
                ..
            } => {
                outcomes.clear();
                *failures = 0;
                *started = now;
            }
            SlidingWindow::Time { outcomes, .. } => outcomes.clear(),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Bumped on every transition and reset.
    generation: u64,
    window: SlidingWindow,
    opened_at: Option<Instant>,
    last_transition: Instant,
    /// Trials admitted in the current half-open episode.
    trials_admitted: u32,
    /// Admitted trials whose outcome is still pending.
    trials_in_flight: u32,
    trial_successes: u32,
    not_permitted: u64,
}

/// Per-dependency circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let now = Instant::now();
        let name = name.into();
        metrics::record_circuit_state(&name, CircuitState::Closed);
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                generation: 0,
                window: SlidingWindow::new(&config, now),
                opened_at: None,
                last_transition: now,
                trials_admitted: 0,
                trials_in_flight: 0,
                trial_successes: 0,
                not_permitted: 0,
            }),
            name,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Ask permission for one call.
    ///
    /// Moves Open → Half-Open once the cool-down has elapsed, and counts
    /// admitted half-open trials. `None` means the call must not be made.
    pub fn allow(&self) -> Option<CallPermission> {
        let now = Instant::now();
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            let cooled_down = inner
                .opened_at
                .map(|at| now.duration_since(at) >= self.config.wait_duration_in_open())
                .unwrap_or(true);
            if cooled_down {
                self.transition(&mut inner, CircuitState::HalfOpen, now);
            }
        }

        let permitted = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.trials_admitted < self.config.half_open_trial_calls {
                    inner.trials_admitted += 1;
                    inner.trials_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        };

        if !permitted {
            inner.not_permitted += 1;
            tracing::debug!(dependency = %self.name, state = inner.state.as_str(), "Call not permitted");
            return None;
        }
        Some(CallPermission {
            generation: inner.generation,
        })
    }

    /// Record the outcome of a call admitted by [`allow`](Self::allow).
    ///
    /// `Rejected` means the admitted call never reached the dependency: it is
    /// not counted, and a half-open trial slot is handed back. Outcomes of
    /// calls admitted before the last transition are ignored.
    pub fn record_outcome(&self, permission: CallPermission, outcome: CallOutcome) {
        let now = Instant::now();
        let mut inner = self.lock();

        if permission.generation != inner.generation {
            tracing::trace!(
                dependency = %self.name,
                state = inner.state.as_str(),
                outcome = outcome.as_str(),
                "Ignoring outcome from an earlier circuit state"
            );
            return;
        }

        if outcome == CallOutcome::Rejected {
            if inner.state == CircuitState::HalfOpen && inner.trials_in_flight > 0 {
                inner.trials_in_flight -= 1;
                inner.trials_admitted -= 1;
            }
            return;
        }

        let failed = outcome.is_failure();
        match inner.state {
            CircuitState::Closed => {
                inner.window.record(now, failed);
                let (total, failures) = inner.window.counts(now);
                if total >= self.minimum_calls() && failure_rate(total, failures) > self.config.failure_rate_threshold {
                    tracing::warn!(
                        dependency = %self.name,
                        failures,
                        calls = total,
                        threshold = self.config.failure_rate_threshold,
                        "Failure rate threshold exceeded"
                    );
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::Open => {
                tracing::trace!(dependency = %self.name, outcome = outcome.as_str(), "Ignoring outcome while open");
            }
            CircuitState::HalfOpen => {
                if inner.trials_in_flight == 0 {
                    tracing::trace!(dependency = %self.name, outcome = outcome.as_str(), "Ignoring stale outcome while half-open");
                    return;
                }
                inner.trials_in_flight -= 1;
                if failed {
                    self.transition(&mut inner, CircuitState::Open, now);
                } else {
                    inner.trial_successes += 1;
                    if inner.trial_successes >= self.config.half_open_trial_calls {
                        self.transition(&mut inner, CircuitState::Closed, now);
                    }
                }
            }
        }
    }

    /// Force the breaker back to Closed with an empty window.
    pub fn reset(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Closed, now);
        inner.window.reset(now);
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let now = Instant::now();
        let mut inner = self.lock();
        let (failure_count, success_count, failure_rate) = match inner.state {
            CircuitState::HalfOpen => {
                let failed = inner.trials_admitted - inner.trials_in_flight - inner.trial_successes;
                (failed, inner.trial_successes, None)
            }
            _ => {
                let (total, failures) = inner.window.counts(now);
                let rate = (total > 0).then(|| failure_rate(total, failures));
                (failures, total - failures, rate)
            }
        };
        CircuitSnapshot {
            state: inner.state,
            failure_count,
            success_count,
            failure_rate,
            window_start: inner.window.start(now),
            last_transition: inner.last_transition,
            not_permitted_calls: inner.not_permitted,
        }
    }

    fn minimum_calls(&self) -> u32 {
        match self.config.sliding_window_type {
            SlidingWindowType::CountBased => self
                .config
                .minimum_number_of_calls
                .min(self.config.sliding_window_size)
                .max(1),
            SlidingWindowType::TimeBased => self.config.minimum_number_of_calls.max(1),
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.last_transition = now;
        inner.trials_admitted = 0;
        inner.trials_in_flight = 0;
        inner.trial_successes = 0;
        match to {
            CircuitState::Open => inner.opened_at = Some(now),
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.window.reset(now);
            }
            CircuitState::HalfOpen => {}
        }

        if from != to {
            match to {
                CircuitState::Open => {
                    tracing::warn!(dependency = %self.name, from = from.as_str(), to = to.as_str(), "Circuit state transition")
                }
                _ => {
                    tracing::info!(dependency = %self.name, from = from.as_str(), to = to.as_str(), "Circuit state transition")
                }
            }
            metrics::record_circuit_state(&self.name, to);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }
}

fn failure_rate(total: u32, failures: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        f64::from(failures) * 100.0 / f64::from(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: f64, window: u32, cool_down_ms: u64, trials: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_rate_threshold: threshold,
            sliding_window_size: window,
            minimum_number_of_calls: window,
            wait_duration_in_open_ms: cool_down_ms,
            half_open_trial_calls: trials,
            ..Default::default()
        }
    }

    fn record(cb: &CircuitBreaker, outcome: CallOutcome) {
        let permission = cb
            .allow()
            .unwrap_or_else(|| panic!("call should be permitted in {:?}", cb.state()));
        cb.record_outcome(permission, outcome);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_then_recover_scenario() {
        let cb = CircuitBreaker::new("hello", config(50.0, 10, 5_000, 1));

        for _ in 0..6 {
            record(&cb, CallOutcome::Failure);
        }
        for _ in 0..3 {
            record(&cb, CallOutcome::Success);
        }
        // 9 calls buffered: below the minimum, still closed.
        assert_eq!(cb.state(), CircuitState::Closed);

        record(&cb, CallOutcome::Success);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(4_999)).await;
        assert!(cb.allow().is_none());
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1)).await;
        let trial = cb.allow().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_outcome(trial, CallOutcome::Success);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_threshold_must_be_exceeded() {
        let cb = CircuitBreaker::new("hello", config(50.0, 10, 5_000, 1));
        for _ in 0..5 {
            record(&cb, CallOutcome::Failure);
        }
        for _ in 0..5 {
            record(&cb, CallOutcome::Success);
        }
        // Exactly 50% does not exceed a 50% threshold.
        assert_eq!(cb.state(), CircuitState::Closed);

        // Window slides: oldest failure drops out, a new failure enters.
        record(&cb, CallOutcome::Failure);
        assert_eq!(cb.state(), CircuitState::Closed);

        // Oldest failure out, new failure in, still 5/10.
        record(&cb, CallOutcome::Failure);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_timeouts_count_as_failures() {
        let cb = CircuitBreaker::new("hello", config(50.0, 4, 5_000, 1));
        record(&cb, CallOutcome::Timeout);
        record(&cb, CallOutcome::Timeout);
        record(&cb, CallOutcome::Timeout);
        record(&cb, CallOutcome::Success);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_every_call_until_cool_down() {
        let cb = CircuitBreaker::new("hello", config(50.0, 2, 1_000, 3));
        record(&cb, CallOutcome::Failure);
        record(&cb, CallOutcome::Failure);
        assert_eq!(cb.state(), CircuitState::Open);

        for _ in 0..100 {
            assert!(cb.allow().is_none());
        }
        assert_eq!(cb.snapshot().not_permitted_calls, 100);

        tokio::time::advance(Duration::from_secs(1)).await;
        // Exactly three trials are admitted.
        let trials: Vec<_> = (0..3).map(|_| cb.allow().unwrap()).collect();
        assert!(cb.allow().is_none());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_outcome(trials[0], CallOutcome::Success);
        cb.record_outcome(trials[1], CallOutcome::Success);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_outcome(trials[2], CallOutcome::Success);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("hello", config(50.0, 2, 1_000, 2));
        record(&cb, CallOutcome::Failure);
        record(&cb, CallOutcome::Failure);
        tokio::time::advance(Duration::from_secs(1)).await;

        record(&cb, CallOutcome::Success);
        record(&cb, CallOutcome::Timeout);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.allow().is_none());

        // The cool-down restarts from the second opening.
        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(cb.allow().is_none());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cb.allow().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_outcome_returns_trial_slot() {
        let cb = CircuitBreaker::new("hello", config(50.0, 2, 1_000, 1));
        record(&cb, CallOutcome::Failure);
        record(&cb, CallOutcome::Failure);
        tokio::time::advance(Duration::from_secs(1)).await;

        let abandoned = cb.allow().unwrap();
        assert!(cb.allow().is_none());
        cb.record_outcome(abandoned, CallOutcome::Rejected);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let trial = cb.allow().unwrap();
        cb.record_outcome(trial, CallOutcome::Success);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_rejected_outcome_is_not_counted() {
        let cb = CircuitBreaker::new("hello", config(50.0, 2, 1_000, 1));
        for _ in 0..10 {
            record(&cb, CallOutcome::Rejected);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().buffered_calls(), 0);
    }

    #[test]
    fn test_outcomes_while_open_are_ignored() {
        let cb = CircuitBreaker::new("hello", config(50.0, 2, 60_000, 1));
        let calls: Vec<_> = (0..3).map(|_| cb.allow().unwrap()).collect();
        cb.record_outcome(calls[0], CallOutcome::Failure);
        cb.record_outcome(calls[1], CallOutcome::Failure);
        assert_eq!(cb.state(), CircuitState::Open);

        // Late result of the third call.
        cb.record_outcome(calls[2], CallOutcome::Success);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_from_before_opening_do_not_touch_half_open() {
        let cb = CircuitBreaker::new("hello", config(50.0, 2, 1_000, 1));
        let straggler = cb.allow().unwrap();
        let late_success = cb.allow().unwrap();
        record(&cb, CallOutcome::Failure);
        record(&cb, CallOutcome::Failure);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        let trial = cb.allow().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // An abandoned pre-opening call hands back no trial slot.
        cb.record_outcome(straggler, CallOutcome::Rejected);
        assert!(cb.allow().is_none());

        // A pre-opening success is not a trial result.
        cb.record_outcome(late_success, CallOutcome::Success);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_outcome(trial, CallOutcome::Failure);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_reset_discards_in_flight_outcomes() {
        let cb = CircuitBreaker::new("hello", config(50.0, 1, 60_000, 1));
        let in_flight = cb.allow().unwrap();
        cb.reset();
        cb.record_outcome(in_flight, CallOutcome::Failure);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().buffered_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_based_window_forgets_old_calls() {
        let config = CircuitBreakerConfig {
            failure_rate_threshold: 50.0,
            sliding_window_type: SlidingWindowType::TimeBased,
            sliding_window_size: 10,
            minimum_number_of_calls: 3,
            ..Default::default()
        };
        let cb = CircuitBreaker::new("hello", config);

        record(&cb, CallOutcome::Failure);
        record(&cb, CallOutcome::Failure);
        tokio::time::advance(Duration::from_secs(11)).await;

        // The two failures aged out; one new failure is below the minimum.
        record(&cb, CallOutcome::Failure);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().buffered_calls(), 1);

        record(&cb, CallOutcome::Failure);
        record(&cb, CallOutcome::Success);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let cb = CircuitBreaker::new("hello", config(50.0, 4, 60_000, 1));
        record(&cb, CallOutcome::Success);
        record(&cb, CallOutcome::Failure);

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 1);
        assert_eq!(snapshot.success_count, 1);
        assert_eq!(snapshot.failure_rate, Some(50.0));

        record(&cb, CallOutcome::Failure);
        record(&cb, CallOutcome::Failure);
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().buffered_calls(), 0);
        assert!(cb.allow().is_some());
    }
}
