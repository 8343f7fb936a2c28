//! Prometheus metrics for the VIRTA pipeline
//!
//! A process-global registry behind `OnceLock`, initialised once by the
//! runtime. Components fetch it with [`Metrics::get`] and record
//! opportunistically - a pipeline without initialised metrics (unit tests,
//! embedded use) runs identically, just unobserved.

use crate::breaker::BreakerState;
use crate::error::{PipelineError, Result};
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram_vec, Counter, CounterVec, Gauge, GaugeVec, HistogramVec,
};
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics instance
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// All VIRTA pipeline metrics
pub struct Metrics {
    /// Events received from the subscription (by domain)
    pub events_received: CounterVec,

    /// Events dropped before batching (by reason: filtered, channel_closed)
    pub events_dropped: CounterVec,

    /// Points rejected before the wire (by reason: validation, overflow_*)
    pub points_rejected: CounterVec,

    /// Points currently waiting in the writer's bounded queue
    pub pending_points: Gauge,

    /// Batch sizes per component (histogram of items per flush)
    pub batch_size: HistogramVec,

    /// Flush duration in seconds per component
    pub flush_duration_seconds: HistogramVec,

    /// Batches that exhausted their retries (by component)
    pub batches_failed: CounterVec,

    /// Circuit breaker state per endpoint (0=closed, 1=open, 2=half-open)
    pub breaker_state: GaugeVec,

    /// Failover events (selection moved to a different endpoint)
    pub failover_total: Counter,
}

impl Metrics {
    /// Initialize the global metrics registry
    ///
    /// Returns an error if called twice or if registration fails.
    pub fn init() -> Result<&'static Metrics> {
        let metrics = Self::register()?;
        METRICS
            .set(metrics)
            .map_err(|_| PipelineError::Config("metrics already initialized".to_string()))?;
        METRICS
            .get()
            .ok_or_else(|| PipelineError::Config("metrics initialization raced".to_string()))
    }

    /// Get the global metrics instance, if initialized
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }

    fn register() -> Result<Metrics> {
        let err = |e: prometheus::Error| PipelineError::Config(format!("metrics: {e}"));

        Ok(Metrics {
            events_received: register_counter_vec!(
                "virta_events_received_total",
                "Events received from the subscription",
                &["domain"]
            )
            .map_err(err)?,
            events_dropped: register_counter_vec!(
                "virta_events_dropped_total",
                "Events dropped before batching",
                &["reason"]
            )
            .map_err(err)?,
            points_rejected: register_counter_vec!(
                "virta_points_rejected_total",
                "Points rejected before the sink write",
                &["reason"]
            )
            .map_err(err)?,
            pending_points: register_gauge!(
                "virta_pending_points",
                "Points waiting in the writer queue"
            )
            .map_err(err)?,
            batch_size: register_histogram_vec!(
                "virta_batch_size",
                "Items per flushed batch",
                &["component"],
                vec![1.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0]
            )
            .map_err(err)?,
            flush_duration_seconds: register_histogram_vec!(
                "virta_flush_duration_seconds",
                "Batch dispatch duration",
                &["component"],
                vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
            )
            .map_err(err)?,
            batches_failed: register_counter_vec!(
                "virta_batches_failed_total",
                "Batches that exhausted their retries",
                &["component"]
            )
            .map_err(err)?,
            breaker_state: register_gauge_vec!(
                "virta_breaker_state",
                "Circuit breaker state per endpoint (0=closed, 1=open, 2=half-open)",
                &["endpoint"]
            )
            .map_err(err)?,
            failover_total: register_counter!(
                "virta_failover_total",
                "Times selection moved to a different endpoint"
            )
            .map_err(err)?,
        })
    }

    /// Record one received event
    pub fn record_event_received(&self, domain: &str) {
        self.events_received.with_label_values(&[domain]).inc();
    }

    /// Record one dropped event
    pub fn record_event_dropped(&self, reason: &str) {
        self.events_dropped.with_label_values(&[reason]).inc();
    }

    /// Record one rejected point
    pub fn record_point_rejected(&self, reason: &str) {
        self.points_rejected.with_label_values(&[reason]).inc();
    }

    /// Update the pending-points gauge
    pub fn set_pending_points(&self, pending: usize) {
        self.pending_points.set(pending as f64);
    }

    /// Record one dispatched batch
    pub fn observe_batch(&self, component: &str, size: usize, duration: Duration, ok: bool) {
        self.batch_size
            .with_label_values(&[component])
            .observe(size as f64);
        self.flush_duration_seconds
            .with_label_values(&[component])
            .observe(duration.as_secs_f64());
        if !ok {
            self.batches_failed.with_label_values(&[component]).inc();
        }
    }

    /// Update the breaker-state gauge for one endpoint
    pub fn set_breaker_state(&self, endpoint: &str, state: BreakerState) {
        self.breaker_state
            .with_label_values(&[endpoint])
            .set(state.as_metric_value());
    }

    /// Record one failover
    pub fn record_failover(&self) {
        self.failover_total.inc();
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    // Prometheus registration is process-global, so everything runs in one
    // test to avoid duplicate-registration failures across the test binary.
    #[test]
    fn test_metrics_init_and_record() {
        let metrics = Metrics::init().expect("first init succeeds");

        metrics.record_event_received("sensor");
        metrics.record_event_dropped("filtered");
        metrics.record_point_rejected("validation");
        metrics.set_pending_points(42);
        metrics.observe_batch("events", 10, Duration::from_millis(5), true);
        metrics.observe_batch("writer", 3, Duration::from_millis(2), false);
        metrics.set_breaker_state("primary", BreakerState::Open);
        metrics.record_failover();

        assert_eq!(metrics.pending_points.get(), 42.0);
        assert_eq!(
            metrics.breaker_state.with_label_values(&["primary"]).get(),
            1.0
        );
        assert_eq!(metrics.failover_total.get(), 1.0);
        assert_eq!(
            metrics.batches_failed.with_label_values(&["writer"]).get(),
            1.0
        );

        // Second init fails cleanly
        assert!(Metrics::init().is_err());
        assert!(Metrics::get().is_some());
    }
}
