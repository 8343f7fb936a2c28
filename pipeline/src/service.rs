//! Telemetry service - wires the pipeline together
//!
//! ```text
//! subscription ──► EntityFilter ──► BatchProcessor ──► handlers
//!     (mpsc)                                             │
//!                                                        ▼
//!                                          TimeSeriesBatchWriter ──► sink
//! ```
//!
//! The service owns the connection lifecycle for the upstream link (driven
//! through the [`ConnectionManager`]'s failover), consumes the event channel
//! the external subscription pushes into, and exposes the operational
//! surface: lifecycle, live reconfiguration, and statistics snapshots.
//!
//! Everything the service touches is an explicit handle passed in at
//! construction - no global registries, so isolated tests wire up the whole
//! pipeline with doubles.

use crate::batch::BatchProcessor;
use crate::connection::{ConnectionManager, EndpointHealth, EndpointReport};
use crate::error::{PipelineError, Result};
use crate::filter::{EntityFilter, FilterConfig, FilterStats};
use crate::fsm::StateMachine;
use crate::lifecycle::{connection_state_machine, ConnectionState};
use crate::metrics::Metrics;
use crate::retry::RetryPolicy;
use crate::stats::BatchStatistics;
use crate::writer::{OverflowStrategy, TimeSeriesBatchWriter, WriterStatistics};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use virta_core::{BatchHandler, SinkError, StateEvent};

/// Built-in handler that feeds flushed event batches into the point writer
///
/// Per-event conversion and overflow failures are counted by the writer and
/// never fail the batch - a malformed entity must not block its neighbours.
struct PointWriterHandler {
    writer: Arc<TimeSeriesBatchWriter>,
}

#[async_trait]
impl BatchHandler<StateEvent> for PointWriterHandler {
    fn name(&self) -> &'static str {
        "timeseries-writer"
    }

    async fn handle(&self, batch: &[StateEvent]) -> std::result::Result<(), SinkError> {
        for event in batch {
            if let Err(e) = self.writer.enqueue_event(event).await {
                debug!(entity_id = %event.entity_id, error = %e, "event not queued for the sink");
            }
        }
        Ok(())
    }
}

/// Point-in-time view of the whole pipeline, for the health/metrics surface
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatistics {
    /// Upstream link state
    pub connection_state: ConnectionState,
    /// Events consumed from the subscription channel
    pub events_received: u64,
    /// Filter counters
    pub filter: FilterStats,
    /// Event-side batching statistics
    pub batch: BatchStatistics,
    /// Point-side writer statistics
    pub writer: WriterStatistics,
    /// Per-endpoint breaker and selection stats
    pub endpoints: Vec<EndpointReport>,
}

/// Orchestrating service over subscription, filter, batcher, and writer
pub struct TelemetryService {
    filter: Arc<EntityFilter>,
    processor: Arc<BatchProcessor<StateEvent>>,
    writer: Arc<TimeSeriesBatchWriter>,
    connections: Arc<ConnectionManager>,
    connection_fsm: Mutex<StateMachine<ConnectionState>>,
    events_received: AtomicU64,
    rx: Mutex<Option<mpsc::Receiver<StateEvent>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl TelemetryService {
    /// Wire a service from its collaborators
    ///
    /// The writer is registered as the first batch handler; additional
    /// consumers attach through [`register_handler`](Self::register_handler).
    pub fn new(
        rx: mpsc::Receiver<StateEvent>,
        filter: Arc<EntityFilter>,
        connections: Arc<ConnectionManager>,
        processor: Arc<BatchProcessor<StateEvent>>,
        writer: Arc<TimeSeriesBatchWriter>,
    ) -> Self {
        processor.register_handler(Arc::new(PointWriterHandler {
            writer: Arc::clone(&writer),
        }));
        Self {
            filter,
            processor,
            writer,
            connections,
            connection_fsm: Mutex::new(connection_state_machine()),
            events_received: AtomicU64::new(0),
            rx: Mutex::new(Some(rx)),
            consumer: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Attach an additional batch consumer
    pub fn register_handler(&self, handler: Arc<dyn BatchHandler<StateEvent>>) {
        self.processor.register_handler(handler);
    }

    /// Upstream link state
    pub fn connection_state(&self) -> ConnectionState {
        self.connection_fsm.lock().state()
    }

    /// Establish the upstream link through the failover manager
    ///
    /// Walks the connection lifecycle: the probe covers transport and
    /// credential exchange, so a successful selection moves straight through
    /// authenticating to connected. With every endpoint exhausted the
    /// machine lands in failed and the caller owns backoff and retry.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut fsm = self.connection_fsm.lock();
            match fsm.state() {
                ConnectionState::Disconnected => {
                    fsm.transition(ConnectionState::Connecting)?;
                }
                ConnectionState::Failed | ConnectionState::Connected => {
                    fsm.transition(ConnectionState::Reconnecting)?;
                    fsm.transition(ConnectionState::Connecting)?;
                }
                ConnectionState::Reconnecting => {
                    fsm.transition(ConnectionState::Connecting)?;
                }
                ConnectionState::Connecting | ConnectionState::Authenticating => {}
            }
        }

        match self.connections.get_connection().await {
            Some(endpoint) => {
                let mut fsm = self.connection_fsm.lock();
                fsm.transition(ConnectionState::Authenticating)?;
                fsm.transition(ConnectionState::Connected)?;
                info!(endpoint = %endpoint.name, url = %endpoint.url, "subscription endpoint selected");
                Ok(())
            }
            None => {
                self.connection_fsm
                    .lock()
                    .transition(ConnectionState::Failed)?;
                Err(PipelineError::NoHealthyEndpoint)
            }
        }
    }

    /// Start the pipeline: connect, start batching, consume the channel
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let rx = self
            .rx
            .lock()
            .take()
            .ok_or_else(|| PipelineError::Shutdown("service already started".to_string()))?;

        self.processor.start()?;
        self.writer.start()?;

        let (tx, shutdown_rx) = watch::channel(false);
        *self.shutdown_tx.lock() = Some(tx);

        let this = Arc::clone(self);
        *self.consumer.lock() = Some(tokio::spawn(async move {
            this.consume(rx, shutdown_rx).await;
        }));

        info!("telemetry service started");
        Ok(())
    }

    /// Consume the subscription channel until it closes or shutdown fires
    async fn consume(
        &self,
        mut rx: mpsc::Receiver<StateEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => self.ingest(event).await,
                        None => {
                            // The producer hung up; only the not-yet-flushed
                            // batch is at risk, and stop() drains that.
                            warn!("subscription channel closed");
                            let mut fsm = self.connection_fsm.lock();
                            if fsm.state() == ConnectionState::Connected {
                                let _ = fsm.transition(ConnectionState::Disconnected);
                            }
                            break;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("subscription consumer stopped");
    }

    /// Filter and batch one event
    async fn ingest(&self, event: StateEvent) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = Metrics::get() {
            m.record_event_received(&event.domain);
        }

        if self.filter.should_include(&event) {
            self.processor.add_item(event).await;
        } else if let Some(m) = Metrics::get() {
            m.record_event_dropped("filtered");
        }
    }

    /// Stop the pipeline, draining both batching stages
    ///
    /// Idempotent. The consumer exits first so nothing new enters the
    /// processor while it drains.
    pub async fn stop(&self) -> Result<()> {
        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(true);
        }
        let consumer = self.consumer.lock().take();
        if let Some(consumer) = consumer {
            let _ = consumer.await;
        }

        self.processor.stop().await?;
        self.writer.stop().await?;

        {
            let mut fsm = self.connection_fsm.lock();
            if fsm.state() == ConnectionState::Connected {
                fsm.transition(ConnectionState::Disconnected)?;
            }
        }

        info!("telemetry service stopped");
        Ok(())
    }

    /// Swap the filter rule set, atomically
    pub fn reload_filter(&self, config: FilterConfig) {
        self.filter.reload(config);
    }

    /// Change both batching stages' size trigger
    pub fn configure_batch_size(&self, batch_size: usize) -> Result<()> {
        self.processor.set_batch_size(batch_size)?;
        self.writer.set_batch_size(batch_size)
    }

    /// Change both batching stages' time trigger
    pub fn configure_batch_timeout(&self, batch_timeout: Duration) -> Result<()> {
        self.processor.set_batch_timeout(batch_timeout)?;
        self.writer.set_batch_timeout(batch_timeout)
    }

    /// Change both batching stages' retry policy
    pub fn configure_retry(&self, retry: RetryPolicy) {
        self.processor.set_retry_policy(retry.clone());
        self.writer.set_retry_policy(retry);
    }

    /// Change the writer's queue ceiling and overflow policy
    pub fn configure_queue_limits(
        &self,
        max_pending_points: usize,
        strategy: OverflowStrategy,
    ) -> Result<()> {
        self.writer.set_max_pending_points(max_pending_points)?;
        self.writer.set_overflow_strategy(strategy);
        Ok(())
    }

    /// Probe every endpoint for a diagnostic report (read-only)
    pub async fn health_check(&self) -> Vec<EndpointHealth> {
        self.connections.health_check().await
    }

    /// Snapshot of the whole pipeline for the health/metrics surface
    pub fn get_statistics(&self) -> ServiceStatistics {
        ServiceStatistics {
            connection_state: self.connection_state(),
            events_received: self.events_received.load(Ordering::Relaxed),
            filter: self.filter.stats(),
            batch: self.processor.statistics(),
            writer: self.writer.statistics(),
            endpoints: self.connections.endpoint_reports(),
        }
    }
}
