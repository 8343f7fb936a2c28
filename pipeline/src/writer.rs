//! Time-series batch writer
//!
//! The point-side specialization of the batching skeleton: same
//! size/timeout triggers, lifecycle machine, retry policy and rolling
//! statistics as [`BatchProcessor`](crate::batch::BatchProcessor), plus the
//! three things a sink write path needs:
//!
//! - **validation on enqueue** - malformed points are rejected and counted,
//!   never silently dropped
//! - **bounded pending queue** - when `max_pending_points` is reached, the
//!   configured [`OverflowStrategy`] decides deterministically who loses;
//!   the producer is never blocked indefinitely
//! - **revalidation on flush** - the schema may be reconfigured between
//!   enqueue and write; only the currently-valid subset goes on the wire
//!
//! Steady-state memory ceiling: `max_pending_points` queued plus one
//! in-flight batch of `batch_size`.

use crate::error::{PipelineError, Result};
use crate::fsm::StateMachine;
use crate::lifecycle::{processing_state_machine, ProcessingState};
use crate::metrics::Metrics;
use crate::retry::RetryPolicy;
use crate::schema::PointSchema;
use crate::stats::{BatchStatistics, RollingStats};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use virta_core::{Point, SinkClient, SinkError, StateEvent};

/// What to do when the pending queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowStrategy {
    /// Evict the oldest queued points to admit the new one
    #[default]
    DropOldest,
    /// Reject the new point and return failure to the producer
    DropNew,
}

/// Writer construction parameters
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Points per sink write
    pub batch_size: usize,
    /// Upper bound on time between flushes
    pub batch_timeout: Duration,
    /// Pending-queue ceiling; overflow applies the strategy
    pub max_pending_points: usize,
    /// Who loses when the queue is full
    pub overflow_strategy: OverflowStrategy,
    /// Retry policy for sink writes
    pub retry: RetryPolicy,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            batch_timeout: Duration::from_secs(10),
            max_pending_points: 10_000,
            overflow_strategy: OverflowStrategy::DropOldest,
            retry: RetryPolicy::default(),
        }
    }
}

/// Callback invoked when a write exhausts its retries
pub type WriteErrorHook = Arc<dyn Fn(&SinkError) + Send + Sync>;

#[derive(Default)]
struct WriterCounters {
    written_points: AtomicU64,
    failed_points: AtomicU64,
    dropped_points: AtomicU64,
    rejected_points: AtomicU64,
    queue_overflow_events: AtomicU64,
    validation_failures: AtomicU64,
}

/// Point-in-time writer statistics
#[derive(Debug, Clone, Serialize)]
pub struct WriterStatistics {
    /// Points waiting in the bounded queue
    pub pending_points: usize,
    /// Configured queue ceiling
    pub max_pending_points: usize,
    /// Points confirmed written
    pub written_points: u64,
    /// Points lost to retry exhaustion
    pub failed_points: u64,
    /// Points evicted by `drop_oldest`
    pub dropped_points: u64,
    /// Points rejected by `drop_new`
    pub rejected_points: u64,
    /// Times the queue hit its ceiling
    pub queue_overflow_events: u64,
    /// Points rejected by validation (enqueue or flush)
    pub validation_failures: u64,
    /// Batch-level rolling statistics
    pub batch: BatchStatistics,
}

/// Batching sink writer with validation and bounded-queue backpressure
pub struct TimeSeriesBatchWriter {
    sink: Arc<dyn SinkClient>,
    schema: RwLock<PointSchema>,
    batch_size: AtomicUsize,
    batch_timeout_ms: AtomicU64,
    max_pending: AtomicUsize,
    overflow: RwLock<OverflowStrategy>,
    retry: RwLock<RetryPolicy>,
    pending: tokio::sync::Mutex<VecDeque<Point>>,
    /// Mirror of the pending queue length, for lock-free statistics reads
    pending_len: AtomicUsize,
    counters: WriterCounters,
    error_hooks: RwLock<Vec<WriteErrorHook>>,
    lifecycle: Mutex<StateMachine<ProcessingState>>,
    stats: Mutex<RollingStats>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl TimeSeriesBatchWriter {
    /// Create a writer over the given sink and schema
    ///
    /// Fails with [`PipelineError::Config`] on non-positive batch size,
    /// timeout, or queue limit.
    pub fn new(
        sink: Arc<dyn SinkClient>,
        schema: PointSchema,
        config: WriterConfig,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be > 0".to_string()));
        }
        if config.batch_timeout.is_zero() {
            return Err(PipelineError::Config("batch_timeout must be > 0".to_string()));
        }
        if config.max_pending_points == 0 {
            return Err(PipelineError::Config(
                "max_pending_points must be > 0".to_string(),
            ));
        }
        Ok(Self {
            sink,
            schema: RwLock::new(schema),
            batch_size: AtomicUsize::new(config.batch_size),
            batch_timeout_ms: AtomicU64::new(config.batch_timeout.as_millis() as u64),
            max_pending: AtomicUsize::new(config.max_pending_points),
            overflow: RwLock::new(config.overflow_strategy),
            retry: RwLock::new(config.retry),
            pending: tokio::sync::Mutex::new(VecDeque::new()),
            pending_len: AtomicUsize::new(0),
            counters: WriterCounters::default(),
            error_hooks: RwLock::new(Vec::new()),
            lifecycle: Mutex::new(processing_state_machine()),
            stats: Mutex::new(RollingStats::new()),
            shutdown_tx: Mutex::new(None),
            timer: Mutex::new(None),
        })
    }

    /// Register a callback for writes that exhaust their retries
    pub fn on_write_error(&self, hook: impl Fn(&SinkError) + Send + Sync + 'static) {
        self.error_hooks.write().push(Arc::new(hook));
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProcessingState {
        self.lifecycle.lock().state()
    }

    /// Start the background flush timer and transition to running
    pub fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut fsm = self.lifecycle.lock();
            fsm.transition(ProcessingState::Starting)?;
            fsm.transition(ProcessingState::Running)?;
        }

        let (tx, rx) = watch::channel(false);
        *self.shutdown_tx.lock() = Some(tx);

        let this = Arc::clone(self);
        *self.timer.lock() = Some(tokio::spawn(async move {
            this.timer_loop(rx).await;
        }));

        info!(
            sink = self.sink.name(),
            batch_size = self.batch_size.load(Ordering::Relaxed),
            max_pending_points = self.max_pending.load(Ordering::Relaxed),
            "time-series writer started"
        );
        Ok(())
    }

    /// Stop: flush pending points, cancel the timer, shut the sink down
    ///
    /// Idempotent. An in-flight write finishes its current attempt.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut fsm = self.lifecycle.lock();
            match fsm.state() {
                ProcessingState::Stopped => return Ok(()),
                ProcessingState::Error => {}
                _ => fsm.transition(ProcessingState::Stopping)?,
            }
        }

        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(true);
        }
        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            let _ = timer.await;
        }

        // Drain everything, not just one batch
        loop {
            if !self.flush().await {
                break;
            }
        }

        if let Err(e) = self.sink.shutdown().await {
            warn!(sink = self.sink.name(), error = %e, "sink shutdown failed");
        }
        self.lifecycle.lock().transition(ProcessingState::Stopped)?;
        info!(sink = self.sink.name(), "time-series writer stopped");
        Ok(())
    }

    /// Convert an event through the schema and enqueue the point
    pub async fn enqueue_event(&self, event: &StateEvent) -> std::result::Result<(), SinkError> {
        let point = {
            let schema = self.schema.read();
            schema.event_to_point(event)
        };
        match point {
            Ok(point) => self.enqueue_point(point).await,
            Err(e) => {
                self.counters
                    .validation_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(entity_id = %event.entity_id, error = %e, "event rejected by schema");
                Err(e)
            }
        }
    }

    /// Validate and enqueue one point, applying backpressure at the ceiling
    ///
    /// Reaching `batch_size` pending points detaches a batch inside the lock
    /// and writes it outside, same as the event-side processor.
    pub async fn enqueue_point(&self, point: Point) -> std::result::Result<(), SinkError> {
        if let Err(e) = self.schema.read().validate(&point) {
            self.counters
                .validation_failures
                .fetch_add(1, Ordering::Relaxed);
            warn!(measurement = %point.measurement, error = %e, "point rejected by validation");
            if let Some(m) = Metrics::get() {
                m.record_point_rejected("validation");
            }
            return Err(e);
        }

        let detached = {
            let mut pending = self.pending.lock().await;
            let max = self.max_pending.load(Ordering::Relaxed);

            if pending.len() >= max {
                self.counters
                    .queue_overflow_events
                    .fetch_add(1, Ordering::Relaxed);
                match *self.overflow.read() {
                    OverflowStrategy::DropOldest => {
                        // Evict just enough to admit the new point
                        let evict = pending.len() + 1 - max;
                        for _ in 0..evict {
                            pending.pop_front();
                        }
                        self.counters
                            .dropped_points
                            .fetch_add(evict as u64, Ordering::Relaxed);
                        if let Some(m) = Metrics::get() {
                            m.record_point_rejected("overflow_drop_oldest");
                        }
                        warn!(
                            evicted = evict,
                            max_pending = max,
                            "pending queue full, dropped oldest points"
                        );
                    }
                    OverflowStrategy::DropNew => {
                        self.counters
                            .rejected_points
                            .fetch_add(1, Ordering::Relaxed);
                        if let Some(m) = Metrics::get() {
                            m.record_point_rejected("overflow_drop_new");
                        }
                        return Err(SinkError::QueueFull(max));
                    }
                }
            }

            pending.push_back(point);
            self.pending_len.store(pending.len(), Ordering::Relaxed);

            if pending.len() >= self.batch_size.load(Ordering::Relaxed) {
                Some(self.detach_locked(&mut pending))
            } else {
                None
            }
        };

        if let Some(batch) = detached {
            self.write_batch(batch).await;
        }
        Ok(())
    }

    /// Flush up to one batch of pending points
    ///
    /// Returns `true` when a batch was written (or attempted), `false` when
    /// nothing was pending.
    pub async fn flush(&self) -> bool {
        let batch = {
            let mut pending = self.pending.lock().await;
            if pending.is_empty() {
                return false;
            }
            self.detach_locked(&mut pending)
        };
        self.write_batch(batch).await;
        true
    }

    /// Detach up to `batch_size` points from the queue front, FIFO
    fn detach_locked(&self, pending: &mut VecDeque<Point>) -> Vec<Point> {
        let take = self.batch_size.load(Ordering::Relaxed).min(pending.len());
        let batch: Vec<Point> = pending.drain(..take).collect();
        self.pending_len.store(pending.len(), Ordering::Relaxed);
        batch
    }

    /// Revalidate and write one detached batch with bounded retry
    async fn write_batch(&self, batch: Vec<Point>) {
        let started = Instant::now();

        // Revalidate against the schema as it is NOW, not as it was at
        // enqueue time; only the valid subset goes on the wire.
        let schema = self.schema.read().clone();
        let mut valid = Vec::with_capacity(batch.len());
        let mut invalid = 0u64;
        for point in batch {
            match schema.validate(&point) {
                Ok(()) => valid.push(point),
                Err(e) => {
                    invalid += 1;
                    debug!(measurement = %point.measurement, error = %e, "point invalid at flush, excluded");
                }
            }
        }
        if invalid > 0 {
            self.counters
                .validation_failures
                .fetch_add(invalid, Ordering::Relaxed);
            warn!(excluded = invalid, "points failed revalidation at flush");
        }
        if valid.is_empty() {
            return;
        }

        let retry = self.retry.read().clone();
        let mut delivered = false;
        let mut last_error = None;

        for attempt in 0..retry.total_attempts() {
            let delay = retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                debug!(
                    sink = self.sink.name(),
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying sink write"
                );
                tokio::time::sleep(delay).await;
            }

            match self.sink.write(&valid).await {
                Ok(()) => {
                    if attempt > 0 {
                        info!(
                            sink = self.sink.name(),
                            attempt = attempt,
                            "sink write recovered after retry"
                        );
                    }
                    delivered = true;
                    break;
                }
                Err(e) => {
                    warn!(
                        sink = self.sink.name(),
                        attempt = attempt,
                        error = %e,
                        count = valid.len(),
                        "sink write failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        let duration = started.elapsed();
        if delivered {
            self.counters
                .written_points
                .fetch_add(valid.len() as u64, Ordering::Relaxed);
        } else {
            // Bounded, counted loss: surface through the hooks and keep
            // accepting new data.
            self.counters
                .failed_points
                .fetch_add(valid.len() as u64, Ordering::Relaxed);
            let err = last_error
                .unwrap_or_else(|| SinkError::Write("retries exhausted".to_string()));
            error!(
                sink = self.sink.name(),
                count = valid.len(),
                error = %err,
                "sink write exhausted retries, points lost"
            );
            for hook in self.error_hooks.read().iter() {
                hook(&err);
            }
        }

        self.stats
            .lock()
            .record_batch(valid.len(), duration, delivered);
        if let Some(m) = Metrics::get() {
            m.observe_batch("writer", valid.len(), duration, delivered);
            m.set_pending_points(self.pending_len.load(Ordering::Relaxed));
        }
    }

    /// Timer task: unconditional flush every `batch_timeout`
    async fn timer_loop(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let timeout =
                Duration::from_millis(self.batch_timeout_ms.load(Ordering::Relaxed).max(1));
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    self.flush().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(sink = self.sink.name(), "writer flush timer stopped");
    }

    /// Change the size trigger, effective immediately
    pub fn set_batch_size(&self, batch_size: usize) -> Result<()> {
        if batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be > 0".to_string()));
        }
        self.batch_size.store(batch_size, Ordering::Relaxed);
        Ok(())
    }

    /// Change the time trigger, effective on the next timer tick
    pub fn set_batch_timeout(&self, batch_timeout: Duration) -> Result<()> {
        if batch_timeout.is_zero() {
            return Err(PipelineError::Config("batch_timeout must be > 0".to_string()));
        }
        self.batch_timeout_ms
            .store(batch_timeout.as_millis() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Change the queue ceiling, effective on the next enqueue
    pub fn set_max_pending_points(&self, max_pending_points: usize) -> Result<()> {
        if max_pending_points == 0 {
            return Err(PipelineError::Config(
                "max_pending_points must be > 0".to_string(),
            ));
        }
        self.max_pending.store(max_pending_points, Ordering::Relaxed);
        Ok(())
    }

    /// Change the overflow strategy, effective on the next enqueue
    pub fn set_overflow_strategy(&self, strategy: OverflowStrategy) {
        *self.overflow.write() = strategy;
    }

    /// Replace the retry policy for future writes
    pub fn set_retry_policy(&self, retry: RetryPolicy) {
        *self.retry.write() = retry;
    }

    /// Replace the conversion/validation schema
    pub fn set_schema(&self, schema: PointSchema) {
        *self.schema.write() = schema;
    }

    /// Point-in-time writer statistics
    pub fn statistics(&self) -> WriterStatistics {
        WriterStatistics {
            pending_points: self.pending_len.load(Ordering::Relaxed),
            max_pending_points: self.max_pending.load(Ordering::Relaxed),
            written_points: self.counters.written_points.load(Ordering::Relaxed),
            failed_points: self.counters.failed_points.load(Ordering::Relaxed),
            dropped_points: self.counters.dropped_points.load(Ordering::Relaxed),
            rejected_points: self.counters.rejected_points.load(Ordering::Relaxed),
            queue_overflow_events: self
                .counters
                .queue_overflow_events
                .load(Ordering::Relaxed),
            validation_failures: self
                .counters
                .validation_failures
                .load(Ordering::Relaxed),
            batch: self
                .stats
                .lock()
                .snapshot(self.pending_len.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Sink that records writes and can be scripted to fail
    struct MockSink {
        writes: Mutex<Vec<Vec<Point>>>,
        failures_remaining: AtomicU32,
        shutdown_called: std::sync::atomic::AtomicBool,
    }

    impl MockSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                writes: Mutex::new(Vec::new()),
                failures_remaining: AtomicU32::new(0),
                shutdown_called: std::sync::atomic::AtomicBool::new(false),
            })
        }

        fn failing(n: u32) -> Arc<Self> {
            let sink = Self::new();
            sink.failures_remaining.store(n, Ordering::SeqCst);
            sink
        }

        fn writes(&self) -> Vec<Vec<Point>> {
            self.writes.lock().clone()
        }

        fn written_count(&self) -> usize {
            self.writes.lock().iter().map(Vec::len).sum()
        }
    }

    #[async_trait]
    impl SinkClient for MockSink {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn write(&self, points: &[Point]) -> std::result::Result<(), SinkError> {
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(SinkError::Write("scripted failure".to_string()));
            }
            self.writes.lock().push(points.to_vec());
            Ok(())
        }

        async fn health(&self) -> bool {
            true
        }

        async fn shutdown(&self) -> std::result::Result<(), SinkError> {
            self.shutdown_called.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn point(n: i64) -> Point {
        Point::new("sensor", n).tag("entity_id", "sensor.t").field("value", n as f64)
    }

    fn writer_with(
        sink: Arc<MockSink>,
        batch_size: usize,
        max_pending: usize,
        strategy: OverflowStrategy,
    ) -> Arc<TimeSeriesBatchWriter> {
        Arc::new(
            TimeSeriesBatchWriter::new(
                sink,
                PointSchema::new(),
                WriterConfig {
                    batch_size,
                    batch_timeout: Duration::from_secs(60),
                    max_pending_points: max_pending,
                    overflow_strategy: strategy,
                    retry: RetryPolicy::linear(0, Duration::ZERO),
                },
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_rejects_invalid_config() {
        let sink = MockSink::new();
        for config in [
            WriterConfig { batch_size: 0, ..Default::default() },
            WriterConfig { batch_timeout: Duration::ZERO, ..Default::default() },
            WriterConfig { max_pending_points: 0, ..Default::default() },
        ] {
            assert!(matches!(
                TimeSeriesBatchWriter::new(sink.clone(), PointSchema::new(), config),
                Err(PipelineError::Config(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_size_trigger_writes_batch() {
        let sink = MockSink::new();
        let writer = writer_with(sink.clone(), 3, 100, OverflowStrategy::DropOldest);

        for i in 1..=3 {
            writer.enqueue_point(point(i)).await.unwrap();
        }

        assert_eq!(sink.writes().len(), 1);
        assert_eq!(sink.writes()[0].len(), 3);
        assert_eq!(writer.statistics().pending_points, 0);
        assert_eq!(writer.statistics().written_points, 3);
    }

    #[tokio::test]
    async fn test_drop_oldest_evicts_front() {
        let sink = MockSink::new();
        // batch_size larger than the ceiling so nothing flushes
        let writer = writer_with(sink.clone(), 100, 5, OverflowStrategy::DropOldest);

        for i in 1..=8 {
            writer.enqueue_point(point(i)).await.unwrap();
        }

        let stats = writer.statistics();
        assert_eq!(stats.pending_points, 5);
        assert_eq!(stats.dropped_points, 3);
        assert_eq!(stats.queue_overflow_events, 3);

        // Oldest evicted first: the surviving points are 4..=8
        writer.flush().await;
        let written = &sink.writes()[0];
        assert_eq!(written.len(), 5);
        assert_eq!(written[0].timestamp_ns, 4);
        assert_eq!(written[4].timestamp_ns, 8);
    }

    #[tokio::test]
    async fn test_drop_new_rejects_and_keeps_queue() {
        let sink = MockSink::new();
        let writer = writer_with(sink.clone(), 100, 5, OverflowStrategy::DropNew);

        for i in 1..=5 {
            writer.enqueue_point(point(i)).await.unwrap();
        }
        let result = writer.enqueue_point(point(6)).await;
        assert!(matches!(result, Err(SinkError::QueueFull(5))));

        let stats = writer.statistics();
        assert_eq!(stats.pending_points, 5);
        assert_eq!(stats.rejected_points, 1);
        assert_eq!(stats.queue_overflow_events, 1);

        // The queue still holds the original oldest point
        writer.flush().await;
        assert_eq!(sink.writes()[0][0].timestamp_ns, 1);
    }

    #[tokio::test]
    async fn test_invalid_point_rejected_on_enqueue() {
        let sink = MockSink::new();
        let writer = writer_with(sink.clone(), 100, 100, OverflowStrategy::DropOldest);

        let bad = Point::new("sensor", 1); // no fields
        assert!(writer.enqueue_point(bad).await.is_err());

        let stats = writer.statistics();
        assert_eq!(stats.validation_failures, 1);
        assert_eq!(stats.pending_points, 0);
    }

    #[tokio::test]
    async fn test_enqueue_event_converts_through_schema() {
        let sink = MockSink::new();
        let writer = writer_with(sink.clone(), 1, 100, OverflowStrategy::DropOldest);

        let event = StateEvent::new("sensor.kitchen_temperature", "21.5");
        writer.enqueue_event(&event).await.unwrap();

        let written = &sink.writes()[0];
        assert_eq!(written[0].measurement, "sensor");
    }

    #[tokio::test]
    async fn test_event_conversion_failure_counted() {
        let sink = MockSink::new();
        let writer = writer_with(sink.clone(), 100, 100, OverflowStrategy::DropOldest);

        let mut event = StateEvent::new("sensor.t", "1");
        event.entity_id = String::new();
        assert!(writer.enqueue_event(&event).await.is_err());
        assert_eq!(writer.statistics().validation_failures, 1);
    }

    #[tokio::test]
    async fn test_revalidation_excludes_points_after_schema_tightened() {
        let sink = MockSink::new();
        let writer = writer_with(sink.clone(), 100, 100, OverflowStrategy::DropOldest);

        // Valid under the lenient schema in force at enqueue time
        let untagged = Point::new("sensor", 1).field("value", 1.0);
        writer.enqueue_point(untagged).await.unwrap();
        writer.enqueue_point(point(2)).await.unwrap();

        // Schema drifts between enqueue and flush
        writer.set_schema(PointSchema::new().with_required_tag("entity_id"));
        writer.flush().await;

        // Only the tagged point was written; the other was counted out
        assert_eq!(sink.writes().len(), 1);
        assert_eq!(sink.writes()[0].len(), 1);
        assert_eq!(sink.writes()[0][0].timestamp_ns, 2);
        assert_eq!(writer.statistics().validation_failures, 1);
    }

    #[tokio::test]
    async fn test_write_retry_recovers() {
        let sink = MockSink::failing(2);
        let writer = Arc::new(
            TimeSeriesBatchWriter::new(
                sink.clone(),
                PointSchema::new(),
                WriterConfig {
                    batch_size: 2,
                    batch_timeout: Duration::from_secs(60),
                    max_pending_points: 100,
                    overflow_strategy: OverflowStrategy::DropOldest,
                    retry: RetryPolicy::linear(3, Duration::from_millis(1)),
                },
            )
            .unwrap(),
        );

        writer.enqueue_point(point(1)).await.unwrap();
        writer.enqueue_point(point(2)).await.unwrap();

        assert_eq!(sink.written_count(), 2);
        let stats = writer.statistics();
        assert_eq!(stats.written_points, 2);
        assert_eq!(stats.failed_points, 0);
    }

    #[tokio::test]
    async fn test_write_exhaustion_notifies_hooks_and_keeps_accepting() {
        let sink = MockSink::failing(100);
        let writer = Arc::new(
            TimeSeriesBatchWriter::new(
                sink.clone(),
                PointSchema::new(),
                WriterConfig {
                    batch_size: 2,
                    batch_timeout: Duration::from_secs(60),
                    max_pending_points: 100,
                    overflow_strategy: OverflowStrategy::DropOldest,
                    retry: RetryPolicy::linear(1, Duration::from_millis(1)),
                },
            )
            .unwrap(),
        );

        let hook_calls = Arc::new(AtomicU32::new(0));
        let hook_calls_clone = Arc::clone(&hook_calls);
        writer.on_write_error(move |_err| {
            hook_calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        writer.enqueue_point(point(1)).await.unwrap();
        writer.enqueue_point(point(2)).await.unwrap();

        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        assert_eq!(writer.statistics().failed_points, 2);

        // Sink recovers; the writer never stopped accepting
        sink.failures_remaining.store(0, Ordering::SeqCst);
        writer.enqueue_point(point(3)).await.unwrap();
        writer.enqueue_point(point(4)).await.unwrap();
        assert_eq!(writer.statistics().written_points, 2);
    }

    #[tokio::test]
    async fn test_timer_flushes_partial_batch() {
        let sink = MockSink::new();
        let writer = Arc::new(
            TimeSeriesBatchWriter::new(
                sink.clone(),
                PointSchema::new(),
                WriterConfig {
                    batch_size: 1000,
                    batch_timeout: Duration::from_millis(20),
                    max_pending_points: 10_000,
                    overflow_strategy: OverflowStrategy::DropOldest,
                    retry: RetryPolicy::linear(0, Duration::ZERO),
                },
            )
            .unwrap(),
        );
        writer.start().unwrap();

        writer.enqueue_point(point(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(sink.writes().len(), 1);
        assert_eq!(sink.writes()[0].len(), 1);
        writer.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_drains_everything_and_shuts_sink_down() {
        let sink = MockSink::new();
        let writer = writer_with(sink.clone(), 2, 100, OverflowStrategy::DropOldest);
        writer.start().unwrap();

        // 5 points with batch_size 2: stop must drain all of them
        for i in 1..=5 {
            writer.enqueue_point(point(i)).await.unwrap();
        }
        writer.stop().await.unwrap();

        assert_eq!(sink.written_count(), 5);
        assert!(sink.shutdown_called.load(Ordering::SeqCst));
        assert_eq!(writer.state(), ProcessingState::Stopped);

        // Idempotent
        writer.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_queue_limit_configurable_at_runtime() {
        let sink = MockSink::new();
        let writer = writer_with(sink.clone(), 100, 5, OverflowStrategy::DropNew);

        for i in 1..=5 {
            writer.enqueue_point(point(i)).await.unwrap();
        }
        assert!(writer.enqueue_point(point(6)).await.is_err());

        writer.set_max_pending_points(10).unwrap();
        writer.enqueue_point(point(6)).await.unwrap();
        assert_eq!(writer.statistics().pending_points, 6);

        assert!(writer.set_max_pending_points(0).is_err());
    }
}
