//! Multi-endpoint connection manager with priority failover
//!
//! Holds a priority-ordered list of endpoints, each paired with its own
//! [`CircuitBreaker`] and rolling [`EndpointStats`]. Selection walks the list
//! in priority order, skips endpoints whose breaker forbids execution, and
//! runs a bounded health probe against the rest - the first probe that
//! succeeds wins. Probing goes through an injected [`HealthProbe`] so the
//! manager carries no protocol code and tests can fail endpoints at will.

use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::endpoint::{EndpointConfig, EndpointStats, EndpointStatsSnapshot};
use crate::metrics::Metrics;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use virta_core::SinkError;

/// Health probe against one endpoint
///
/// Implementations perform whatever lightweight request proves the endpoint
/// would accept a subscription (a ping, an auth handshake). The manager
/// bounds every probe with the endpoint's own timeout.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe the endpoint, returning `Ok(())` when it is usable
    async fn probe(&self, endpoint: &EndpointConfig) -> Result<(), SinkError>;
}

/// One endpoint with its breaker and stats
struct EndpointEntry {
    config: EndpointConfig,
    breaker: CircuitBreaker,
    stats: EndpointStats,
}

/// Diagnostic result for one endpoint from [`ConnectionManager::health_check`]
#[derive(Debug, Clone, Serialize)]
pub struct EndpointHealth {
    /// Endpoint name
    pub name: String,
    /// Endpoint URL
    pub url: String,
    /// Whether the diagnostic probe succeeded
    pub healthy: bool,
    /// Probe round-trip in milliseconds
    pub probe_ms: f64,
    /// Probe error, when unhealthy
    pub error: Option<String>,
    /// Breaker snapshot at probe time
    pub breaker: BreakerSnapshot,
}

/// Per-endpoint report for the statistics surface
#[derive(Debug, Clone, Serialize)]
pub struct EndpointReport {
    /// Endpoint name
    pub name: String,
    /// Priority rank
    pub priority: u32,
    /// Breaker snapshot
    pub breaker: BreakerSnapshot,
    /// Rolling selection stats
    pub stats: EndpointStatsSnapshot,
}

/// Priority failover across configured endpoints
pub struct ConnectionManager {
    entries: Vec<EndpointEntry>,
    probe: Arc<dyn HealthProbe>,
    /// Index of the endpoint selected by the last successful `get_connection`
    current: RwLock<Option<usize>>,
}

impl ConnectionManager {
    /// Create a manager over the given endpoints
    ///
    /// Endpoints are sorted by priority rank (stable, so configuration order
    /// breaks ties). Each endpoint gets its own breaker built from its
    /// configured thresholds.
    pub fn new(mut endpoints: Vec<EndpointConfig>, probe: Arc<dyn HealthProbe>) -> Self {
        endpoints.sort_by_key(|e| e.priority);
        let entries = endpoints
            .into_iter()
            .map(|config| EndpointEntry {
                breaker: CircuitBreaker::new(config.name.clone(), config.breaker.clone()),
                stats: EndpointStats::new(),
                config,
            })
            .collect();
        Self {
            entries,
            probe,
            current: RwLock::new(None),
        }
    }

    /// Number of configured endpoints
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no endpoints are configured
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Select the first healthy endpoint in priority order
    ///
    /// Skips endpoints whose breaker forbids execution, probes the rest with
    /// a bounded timeout, and records the outcome in the endpoint's breaker
    /// and stats. Returns `None` when every candidate is exhausted; the
    /// caller owns any outer retry/backoff loop.
    pub async fn get_connection(&self) -> Option<&EndpointConfig> {
        let previous = *self.current.read();

        for (idx, entry) in self.entries.iter().enumerate() {
            if !entry.breaker.can_execute() {
                debug!(
                    endpoint = %entry.config.name,
                    "skipping endpoint, circuit open"
                );
                continue;
            }

            entry.stats.record_attempt();

            match self.bounded_probe(entry).await {
                Ok(()) => {
                    entry.breaker.record_success();
                    entry.stats.record_success();
                    *self.current.write() = Some(idx);

                    if previous.is_some() && previous != Some(idx) {
                        info!(
                            endpoint = %entry.config.name,
                            "failed over to endpoint"
                        );
                        if let Some(m) = Metrics::get() {
                            m.record_failover();
                        }
                    }
                    if let Some(m) = Metrics::get() {
                        m.set_breaker_state(&entry.config.name, entry.breaker.state());
                    }
                    return Some(&entry.config);
                }
                Err(e) => {
                    let msg = e.to_string();
                    entry.breaker.record_failure(&msg);
                    entry.stats.record_failure(&msg);
                    if let Some(m) = Metrics::get() {
                        m.set_breaker_state(&entry.config.name, entry.breaker.state());
                    }
                    warn!(
                        endpoint = %entry.config.name,
                        error = %msg,
                        "endpoint probe failed, trying next"
                    );
                }
            }
        }

        *self.current.write() = None;
        warn!(endpoints = self.entries.len(), "all endpoints exhausted");
        None
    }

    /// The endpoint selected by the last successful `get_connection`, if any
    pub fn current(&self) -> Option<&EndpointConfig> {
        let idx = (*self.current.read())?;
        self.entries.get(idx).map(|e| &e.config)
    }

    /// Probe every endpoint unconditionally for a diagnostic report
    ///
    /// Does not consult or mutate breakers or selection stats: this is the
    /// read-only path behind a health endpoint, and running it must never
    /// change which endpoint the data path picks next.
    pub async fn health_check(&self) -> Vec<EndpointHealth> {
        let mut report = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let started = Instant::now();
            let result = self.bounded_probe(entry).await;
            report.push(EndpointHealth {
                name: entry.config.name.clone(),
                url: entry.config.url.clone(),
                healthy: result.is_ok(),
                probe_ms: started.elapsed().as_secs_f64() * 1000.0,
                error: result.err().map(|e| e.to_string()),
                breaker: entry.breaker.snapshot(),
            });
        }
        report
    }

    /// Per-endpoint breaker and stats snapshots for the statistics surface
    pub fn endpoint_reports(&self) -> Vec<EndpointReport> {
        self.entries
            .iter()
            .map(|entry| EndpointReport {
                name: entry.config.name.clone(),
                priority: entry.config.priority,
                breaker: entry.breaker.snapshot(),
                stats: entry.stats.snapshot(),
            })
            .collect()
    }

    /// Run the probe bounded by the endpoint's own timeout
    async fn bounded_probe(&self, entry: &EndpointEntry) -> Result<(), SinkError> {
        match tokio::time::timeout(entry.config.timeout, self.probe.probe(&entry.config)).await
        {
            Ok(result) => result,
            Err(_) => Err(SinkError::Connection(format!(
                "probe timed out after {:?}",
                entry.config.timeout
            ))),
        }
    }
}
