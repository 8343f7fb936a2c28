//! Per-endpoint circuit breaker
//!
//! Isolates a flapping endpoint: after `fail_max` consecutive failures the
//! circuit opens and `can_execute()` fails fast until `reset_timeout` has
//! elapsed. The first check after the cool-down moves the circuit to
//! half-open, permitting probe traffic; `success_threshold` consecutive
//! successes close it again, any failure reopens it immediately.

use parking_lot::RwLock;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Circuit is closed - requests flow through
    Closed,
    /// Circuit is open - requests fail fast
    Open,
    /// Testing if the endpoint recovered - probe traffic allowed
    HalfOpen,
}

impl BreakerState {
    /// Convert to a Prometheus metric value (0=Closed, 1=Open, 2=HalfOpen)
    pub fn as_metric_value(self) -> f64 {
        match self {
            BreakerState::Closed => 0.0,
            BreakerState::Open => 1.0,
            BreakerState::HalfOpen => 2.0,
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub fail_max: u32,
    /// Time to wait before allowing a recovery probe
    pub reset_timeout: Duration,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            fail_max: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// Internal state tracking
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
    transition_count: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_success: None,
            transition_count: 0,
        }
    }

    fn set_state(&mut self, state: BreakerState) {
        if self.state != state {
            self.state = state;
            self.transition_count += 1;
        }
    }
}

/// Point-in-time view of a breaker, for statistics and health reports
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    /// Current circuit state
    pub state: BreakerState,
    /// Consecutive failures observed
    pub failure_count: u32,
    /// Successes observed since the last failure
    pub success_count: u32,
    /// State changes over the breaker's lifetime
    pub transition_count: u64,
    /// Seconds since the last failure, if any
    pub seconds_since_failure: Option<f64>,
    /// Seconds since the last success, if any
    pub seconds_since_success: Option<f64>,
}

/// Per-endpoint failure/success tracker with fail-fast behavior
pub struct CircuitBreaker {
    endpoint: String,
    config: BreakerConfig,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker for the named endpoint
    pub fn new(endpoint: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            inner: RwLock::new(BreakerInner::new()),
        }
    }

    /// Current circuit state (for monitoring; does not age the circuit)
    pub fn state(&self) -> BreakerState {
        self.inner.read().state
    }

    /// Check whether an attempt is currently allowed
    ///
    /// Closed and half-open circuits allow attempts. An open circuit allows
    /// one only when `reset_timeout` has elapsed since the last failure, in
    /// which case the circuit moves to half-open as a side effect - so the
    /// open→half-open edge fires at most once per cool-down window.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.write();

        match inner.state {
            BreakerState::Closed => true,

            BreakerState::Open => {
                // Note: clippy suggests `if let ... &&` but that's unstable (RFC 2497)
                #[allow(clippy::collapsible_if)]
                if let Some(last_failure) = inner.last_failure {
                    if last_failure.elapsed() >= self.config.reset_timeout {
                        inner.set_state(BreakerState::HalfOpen);
                        inner.success_count = 0;
                        tracing::info!(
                            endpoint = %self.endpoint,
                            "circuit breaker transitioning to half-open"
                        );
                        return true;
                    }
                }
                false
            }

            BreakerState::HalfOpen => true,
        }
    }

    /// Record a successful attempt
    ///
    /// Resets the consecutive-failure count. In half-open state,
    /// `success_threshold` consecutive successes close the circuit.
    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        inner.failure_count = 0;
        inner.success_count += 1;
        inner.last_success = Some(Instant::now());

        if inner.state == BreakerState::HalfOpen
            && inner.success_count >= self.config.success_threshold
        {
            inner.set_state(BreakerState::Closed);
            tracing::info!(
                endpoint = %self.endpoint,
                "circuit breaker closed - endpoint recovered"
            );
        }
    }

    /// Record a failed attempt
    ///
    /// Opens the circuit after `fail_max` consecutive failures from closed;
    /// any single failure while half-open reopens it immediately.
    pub fn record_failure(&self, error: &str) {
        let mut inner = self.inner.write();
        inner.success_count = 0;
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            BreakerState::Closed => {
                if inner.failure_count >= self.config.fail_max {
                    inner.set_state(BreakerState::Open);
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        failures = inner.failure_count,
                        error = %error,
                        "circuit breaker opened - too many failures"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.set_state(BreakerState::Open);
                tracing::warn!(
                    endpoint = %self.endpoint,
                    error = %error,
                    "circuit breaker re-opened - probe failed"
                );
            }
            BreakerState::Open => {
                // Already open, the failure timestamp extends the window
            }
        }
    }

    /// Point-in-time snapshot for statistics
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.read();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            transition_count: inner.transition_count,
            seconds_since_failure: inner.last_failure.map(|t| t.elapsed().as_secs_f64()),
            seconds_since_success: inner.last_success.map(|t| t.elapsed().as_secs_f64()),
        }
    }
}
