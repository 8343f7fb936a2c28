//! Endpoint configuration and rolling per-endpoint statistics

use crate::breaker::BreakerConfig;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default per-probe timeout
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// One upstream endpoint, immutable after load
///
/// Endpoints come from configuration loading (an external collaborator) and
/// are handed to the [`ConnectionManager`](crate::connection::ConnectionManager)
/// as a prioritized list.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Short name for logs and metrics (e.g. "primary", "fallback-lan")
    pub name: String,
    /// Base URL of the endpoint
    pub url: String,
    /// Credential presented during the probe/handshake
    pub token: String,
    /// Priority rank; lower is tried first
    pub priority: u32,
    /// Bound on a single probe or request
    pub timeout: Duration,
    /// Connection retries the caller may spend on this endpoint
    pub retry_count: u32,
    /// Circuit breaker thresholds for this endpoint
    pub breaker: BreakerConfig,
}

impl EndpointConfig {
    /// Create an endpoint with default timeout, retries, and breaker thresholds
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            token: String::new(),
            priority: 0,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry_count: 3,
            breaker: BreakerConfig::default(),
        }
    }

    /// Set the credential token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    /// Set the priority rank (lower is preferred)
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the per-probe timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the breaker thresholds
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }
}

/// Rolling statistics for one endpoint
///
/// Counters are atomics, the last-error/last-success details sit behind a
/// mutex since they are written rarely and read only for reports.
pub struct EndpointStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    detail: Mutex<StatsDetail>,
}

#[derive(Default)]
struct StatsDetail {
    last_error: Option<String>,
    last_success: Option<Instant>,
}

impl EndpointStats {
    pub(crate) fn new() -> Self {
        Self {
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            detail: Mutex::new(StatsDetail::default()),
        }
    }

    pub(crate) fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.detail.lock().last_success = Some(Instant::now());
    }

    pub(crate) fn record_failure(&self, error: &str) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.detail.lock().last_error = Some(error.to_string());
    }

    /// Point-in-time view for reports
    pub fn snapshot(&self) -> EndpointStatsSnapshot {
        let detail = self.detail.lock();
        EndpointStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            last_error: detail.last_error.clone(),
            seconds_since_success: detail.last_success.map(|t| t.elapsed().as_secs_f64()),
        }
    }
}

/// Serializable endpoint statistics
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatsSnapshot {
    /// Selection attempts that reached the probe
    pub attempts: u64,
    /// Successful probes
    pub successes: u64,
    /// Failed probes
    pub failures: u64,
    /// Most recent probe error, if any
    pub last_error: Option<String>,
    /// Seconds since the last successful probe, if any
    pub seconds_since_success: Option<f64>,
}
