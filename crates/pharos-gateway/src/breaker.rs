//! Circuit breaker for unreliable asynchronous dependencies
//!
//! One breaker instance per guarded dependency (one per provider, held by
//! the orchestrator), long-lived so that state accumulates across calls.
//! The breaker decides whether a call may proceed; it never retries.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker open
    pub failure_threshold: u32,
    /// Consecutive half-open successes needed to close
    pub success_threshold: u32,
    /// Per-call deadline; a timeout counts as a failure
    pub call_timeout: Duration,
    /// How long to stay open before letting a probe through
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            call_timeout: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    /// Normal operation
    Closed,
    /// Failing fast
    Open,
    /// Probationary retry
    HalfOpen,
}

/// Errors produced by a breaker-guarded call
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    /// Rejected without invoking the wrapped operation
    #[error("circuit open, retry in {retry_after:?}")]
    Open { retry_after: Duration },

    /// The wrapped operation exceeded the call timeout
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The wrapped operation itself failed
    #[error("{0}")]
    Inner(E),
}

/// Point-in-time snapshot for health/monitoring endpoints
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Milliseconds since the last recorded failure
    pub last_failure_age_ms: Option<u64>,
    /// Milliseconds since the last recorded success
    pub last_success_age_ms: Option<u64>,
    /// Remaining delay before the next attempt is admitted
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
    next_attempt: Option<Instant>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure: None,
            last_success: None,
            next_attempt: None,
        }
    }
}

/// Generic wrapper protecting an asynchronous dependency from cascading
/// failure. Created closed; cycles closed → open → half-open indefinitely.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a breaker with the given configuration
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Run the wrapped operation subject to the breaker's state and
    /// per-call timeout.
    ///
    /// While open, calls are rejected immediately until the reset delay
    /// elapses, at which point the next call is admitted half-open.
    pub async fn execute<T, E, F>(&self, op: F) -> std::result::Result<T, BreakerError<E>>
    where
        F: Future<Output = std::result::Result<T, E>>,
    {
        // Admission check: one mutation point, lock never held across await.
        {
            let mut inner = self.inner.lock();
            if inner.state == BreakerState::Open {
                let now = Instant::now();
                match inner.next_attempt {
                    Some(at) if now < at => {
                        return Err(BreakerError::Open {
                            retry_after: at - now,
                        });
                    }
                    _ => {
                        tracing::debug!("breaker half-open, admitting probe");
                        inner.state = BreakerState::HalfOpen;
                        inner.consecutive_successes = 0;
                    }
                }
            }
        }

        match tokio::time::timeout(self.config.call_timeout, op).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                self.record_failure();
                Err(BreakerError::Timeout(self.config.call_timeout))
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.last_success = Some(Instant::now());
        inner.consecutive_failures = 0;

        if inner.state == BreakerState::HalfOpen {
            inner.consecutive_successes += 1;
            if inner.consecutive_successes >= self.config.success_threshold {
                tracing::info!("breaker closing after successful probes");
                inner.state = BreakerState::Closed;
                inner.consecutive_successes = 0;
                inner.next_attempt = None;
            }
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.last_failure = Some(now);
        inner.consecutive_successes = 0;
        inner.consecutive_failures += 1;

        match inner.state {
            // Any half-open failure reopens immediately.
            BreakerState::HalfOpen => {
                tracing::warn!("breaker reopening after half-open failure");
                inner.state = BreakerState::Open;
                inner.next_attempt = Some(now + self.config.reset_timeout);
            }
            BreakerState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = inner.consecutive_failures,
                        "breaker opening"
                    );
                    inner.state = BreakerState::Open;
                    inner.next_attempt = Some(now + self.config.reset_timeout);
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Snapshot the current state and counters
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        let now = Instant::now();
        BreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            last_failure_age_ms: inner
                .last_failure
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
            last_success_age_ms: inner
                .last_success
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
            retry_after_ms: inner.next_attempt.and_then(|at| {
                (at > now).then(|| (at - now).as_millis() as u64)
            }),
        }
    }

    /// Current state
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Force the breaker closed with zeroed counters (operator escape hatch)
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = Inner::new();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            call_timeout: Duration::from_secs(5),
            reset_timeout: Duration::from_secs(30),
        }
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker
            .execute(async { Err::<(), &str>("boom") })
            .await;
    }

    async fn succeed(breaker: &CircuitBreaker) {
        breaker
            .execute(async { Ok::<_, &str>(()) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let breaker = CircuitBreaker::default();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_opens_at_exact_failure_threshold() {
        let breaker = CircuitBreaker::new(fast_config());
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new(fast_config());
        fail(&breaker).await;
        fail(&breaker).await;
        succeed(&breaker).await;
        fail(&breaker).await;
        fail(&breaker).await;
        // Still closed: the streak was broken.
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_open_rejects_without_invoking() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }

        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let result = breaker
            .execute(async move {
                calls_in.fetch_add(1, Ordering::Relaxed);
                Ok::<_, &str>(())
            })
            .await;

        match result {
            Err(BreakerError::Open { retry_after }) => {
                assert!(retry_after <= Duration::from_secs(30));
                assert!(retry_after > Duration::ZERO);
            }
            other => panic!("expected Open rejection, got {:?}", other.map(|_| ())),
        }
        assert_eq!(calls.load(Ordering::Relaxed), 0, "operation must not run");
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_reset_timeout_then_closes() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;

        // First call after the delay is admitted as a half-open probe.
        succeed(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        // Second consecutive success closes the breaker with zeroed counters.
        succeed(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
        let stats = breaker.stats();
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.consecutive_successes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        succeed(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
        let stats = breaker.stats();
        assert_eq!(stats.consecutive_successes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let config = BreakerConfig {
            failure_threshold: 1,
            call_timeout: Duration::from_millis(50),
            ..fast_config()
        };
        let breaker = CircuitBreaker::new(config);

        let result = breaker
            .execute(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, &str>(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Timeout(_))));
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_reset_forces_closed() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
        let stats = breaker.stats();
        assert_eq!(stats.consecutive_failures, 0);
        assert!(stats.retry_after_ms.is_none());
    }

    #[tokio::test]
    async fn test_stats_report_retry_delay_while_open() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        let stats = breaker.stats();
        assert_eq!(stats.state, BreakerState::Open);
        assert!(stats.retry_after_ms.is_some());
        assert!(stats.last_failure_age_ms.is_some());
    }
}
