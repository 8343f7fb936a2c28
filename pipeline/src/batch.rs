//! Generic size/timeout-triggered batch processor
//!
//! Accumulates items under a cooperative mutex and dispatches them to every
//! registered handler, in registration order, with bounded linear-backoff
//! retry. Two triggers detach the current batch:
//!
//! - **size**: `add_item` reaching `batch_size` detaches inside the lock and
//!   dispatches outside it, so the mutex is never held across I/O
//! - **time**: a background task flushes whatever is pending every
//!   `batch_timeout`, bounding worst-case delivery latency even at a
//!   trickle of traffic
//!
//! Only one batch accumulates at a time and a new one cannot start until the
//! previous is detached, so batches reach handlers in FIFO order with item
//! arrival order preserved.

use crate::error::{PipelineError, Result};
use crate::fsm::StateMachine;
use crate::lifecycle::{processing_state_machine, ProcessingState};
use crate::metrics::Metrics;
use crate::retry::RetryPolicy;
use crate::stats::{BatchStatistics, RollingStats};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use virta_core::BatchHandler;

/// The batch being accumulated, guarded by a cooperative mutex
struct CurrentBatch<T> {
    items: Vec<T>,
    started_at: Option<Instant>,
}

impl<T> CurrentBatch<T> {
    fn detach(&mut self) -> Vec<T> {
        self.started_at = None;
        std::mem::take(&mut self.items)
    }
}

/// Size/timeout-triggered batch accumulator with retrying handler fan-out
///
/// # Example
///
/// ```ignore
/// let processor = Arc::new(BatchProcessor::new(
///     "events",
///     100,
///     Duration::from_secs(5),
///     RetryPolicy::default(),
/// )?);
/// processor.register_handler(Arc::new(MyHandler));
/// processor.start()?;
/// processor.add_item(event).await;
/// ```
pub struct BatchProcessor<T: Send + Sync + 'static> {
    name: &'static str,
    batch_size: AtomicUsize,
    batch_timeout_ms: AtomicU64,
    retry: RwLock<RetryPolicy>,
    handlers: RwLock<Vec<Arc<dyn BatchHandler<T>>>>,
    current: tokio::sync::Mutex<CurrentBatch<T>>,
    /// Mirror of the current batch length, for lock-free statistics reads
    pending_len: AtomicUsize,
    lifecycle: Mutex<StateMachine<ProcessingState>>,
    stats: Mutex<RollingStats>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + Sync + 'static> BatchProcessor<T> {
    /// Create a processor
    ///
    /// Fails with [`PipelineError::Config`] on a zero batch size or timeout -
    /// invalid static configuration is the one error class that surfaces
    /// synchronously at configuration time.
    pub fn new(
        name: &'static str,
        batch_size: usize,
        batch_timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be > 0".to_string()));
        }
        if batch_timeout.is_zero() {
            return Err(PipelineError::Config("batch_timeout must be > 0".to_string()));
        }
        Ok(Self {
            name,
            batch_size: AtomicUsize::new(batch_size),
            batch_timeout_ms: AtomicU64::new(batch_timeout.as_millis() as u64),
            retry: RwLock::new(retry),
            handlers: RwLock::new(Vec::new()),
            current: tokio::sync::Mutex::new(CurrentBatch {
                items: Vec::new(),
                started_at: None,
            }),
            pending_len: AtomicUsize::new(0),
            lifecycle: Mutex::new(processing_state_machine()),
            stats: Mutex::new(RollingStats::new()),
            shutdown_tx: Mutex::new(None),
            timer: Mutex::new(None),
        })
    }

    /// Register a batch consumer; handlers run in registration order
    pub fn register_handler(&self, handler: Arc<dyn BatchHandler<T>>) {
        self.handlers.write().push(handler);
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
            processor = self.name,
            batch_size = self.batch_size.load(Ordering::Relaxed),
            batch_timeout_ms = self.batch_timeout_ms.load(Ordering::Relaxed),
            "batch processor started"
        );
        Ok(())
    }

    /// Hold flushes; items keep accumulating
    pub fn pause(&self) -> Result<()> {
        self.lifecycle
            .lock()
            .transition(ProcessingState::Paused)
            .map_err(Into::into)
    }

    /// Resume flushing after a pause
    pub fn resume(&self) -> Result<()> {
        self.lifecycle
            .lock()
            .transition(ProcessingState::Running)
            .map_err(Into::into)
    }

    /// Stop: flush the remainder, cancel the timer, transition to stopped
    ///
    /// Idempotent; an in-flight dispatch finishes its current attempt rather
    /// than being preempted mid-write.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut fsm = self.lifecycle.lock();
            match fsm.state() {
                ProcessingState::Stopped => return Ok(()),
                // Error -> Stopped is a direct edge; no draining state
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

        self.flush().await;
        self.lifecycle.lock().transition(ProcessingState::Stopped)?;
        info!(processor = self.name, "batch processor stopped");
        Ok(())
    }

    /// Append one item; a full batch is detached and dispatched immediately
    pub async fn add_item(&self, item: T) {
        let detached = {
            let mut current = self.current.lock().await;
            if current.items.is_empty() {
                current.started_at = Some(Instant::now());
            }
            current.items.push(item);
            self.pending_len.store(current.items.len(), Ordering::Relaxed);

            if current.items.len() >= self.batch_size.load(Ordering::Relaxed) {
                let batch = current.detach();
                self.pending_len.store(0, Ordering::Relaxed);
                Some(batch)
            } else {
                None
            }
        };

        // Dispatch outside the lock; producers appending concurrently start
        // the next batch while this one is in flight.
        if let Some(batch) = detached {
            self.dispatch(batch).await;
        }
    }

    /// Flush whatever is pending, unconditionally
    pub async fn flush(&self) {
        let batch = {
            let mut current = self.current.lock().await;
            if current.items.is_empty() {
                return;
            }
            let batch = current.detach();
            self.pending_len.store(0, Ordering::Relaxed);
            batch
        };
        self.dispatch(batch).await;
    }

    /// Deliver one detached batch to every handler with bounded retry
    async fn dispatch(&self, batch: Vec<T>) {
        let handlers: Vec<Arc<dyn BatchHandler<T>>> = self.handlers.read().clone();
        let retry = self.retry.read().clone();
        let started = Instant::now();
        let mut all_ok = true;

        for handler in &handlers {
            let mut delivered = false;

            for attempt in 0..retry.total_attempts() {
                let delay = retry.delay_for_attempt(attempt);
                if !delay.is_zero() {
                    debug!(
                        processor = self.name,
                        handler = handler.name(),
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying batch dispatch"
                    );
                    tokio::time::sleep(delay).await;
                }

                match handler.handle(&batch).await {
                    Ok(()) => {
                        if attempt > 0 {
                            info!(
                                processor = self.name,
                                handler = handler.name(),
                                attempt = attempt,
                                "batch dispatch recovered after retry"
                            );
                        }
                        delivered = true;
                        break;
                    }
                    Err(e) => {
                        warn!(
                            processor = self.name,
                            handler = handler.name(),
                            attempt = attempt,
                            error = %e,
                            "batch dispatch failed"
                        );
                    }
                }
            }

            if !delivered {
                // The whole batch counts as failed; partial application is
                // the handler's responsibility, we never re-deliver a subset.
                all_ok = false;
                error!(
                    processor = self.name,
                    handler = handler.name(),
                    count = batch.len(),
                    "handler exhausted retries, batch failed"
                );
            }
        }

        let duration = started.elapsed();
        self.stats.lock().record_batch(batch.len(), duration, all_ok);
        if let Some(m) = Metrics::get() {
            m.observe_batch(self.name, batch.len(), duration, all_ok);
        }
    }

    /// Timer task: unconditional flush every `batch_timeout`
    async fn timer_loop(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let timeout =
                Duration::from_millis(self.batch_timeout_ms.load(Ordering::Relaxed).max(1));
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    if self.state() == ProcessingState::Paused {
                        continue;
                    }
                    self.flush().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(processor = self.name, "flush timer stopped");
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

    /// Replace the retry policy for future dispatches
    pub fn set_retry_policy(&self, retry: RetryPolicy) {
        *self.retry.write() = retry;
    }

    /// Rolling statistics snapshot
    pub fn statistics(&self) -> BatchStatistics {
        self.stats
            .lock()
            .snapshot(self.pending_len.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use virta_core::SinkError;

    /// Handler that records every batch it receives
    struct RecordingHandler {
        name: &'static str,
        batches: Mutex<Vec<Vec<u32>>>,
    }

    impl RecordingHandler {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                batches: Mutex::new(Vec::new()),
            })
        }

        fn batches(&self) -> Vec<Vec<u32>> {
            self.batches.lock().clone()
        }
    }

    #[async_trait]
    impl BatchHandler<u32> for RecordingHandler {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn handle(&self, batch: &[u32]) -> std::result::Result<(), SinkError> {
            self.batches.lock().push(batch.to_vec());
            Ok(())
        }
    }

    /// Handler that fails N times then succeeds
    struct FlakyHandler {
        fail_count: AtomicU32,
        max_failures: u32,
        calls: AtomicU32,
    }

    impl FlakyHandler {
        fn new(max_failures: u32) -> Arc<Self> {
            Arc::new(Self {
                fail_count: AtomicU32::new(0),
                max_failures,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BatchHandler<u32> for FlakyHandler {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn handle(&self, _batch: &[u32]) -> std::result::Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_count.fetch_add(1, Ordering::SeqCst) < self.max_failures {
                Err(SinkError::Write("simulated failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn processor(batch_size: usize, timeout: Duration) -> Arc<BatchProcessor<u32>> {
        Arc::new(
            BatchProcessor::new("test", batch_size, timeout, RetryPolicy::linear(0, Duration::ZERO))
                .unwrap(),
        )
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let result = BatchProcessor::<u32>::new(
            "bad",
            0,
            Duration::from_secs(1),
            RetryPolicy::default(),
        );
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let result =
            BatchProcessor::<u32>::new("bad", 10, Duration::ZERO, RetryPolicy::default());
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[tokio::test]
    async fn test_size_trigger_flushes_exactly_at_batch_size() {
        let processor = processor(3, Duration::from_secs(60));
        let handler = RecordingHandler::new("recording");
        processor.register_handler(handler.clone());

        processor.add_item(1).await;
        processor.add_item(2).await;
        assert!(handler.batches().is_empty());
        assert_eq!(processor.statistics().pending_items, 2);

        processor.add_item(3).await;

        assert_eq!(handler.batches(), vec![vec![1, 2, 3]]);
        assert_eq!(processor.statistics().pending_items, 0);
    }

    #[tokio::test]
    async fn test_order_preserved_across_batches() {
        let processor = processor(2, Duration::from_secs(60));
        let handler = RecordingHandler::new("recording");
        processor.register_handler(handler.clone());

        for i in 0..6 {
            processor.add_item(i).await;
        }

        assert_eq!(handler.batches(), vec![vec![0, 1], vec![2, 3], vec![4, 5]]);
    }

    #[tokio::test]
    async fn test_timer_flushes_partial_batch() {
        let processor = processor(1000, Duration::from_millis(20));
        let handler = RecordingHandler::new("recording");
        processor.register_handler(handler.clone());
        processor.start().unwrap();

        processor.add_item(7).await;
        processor.add_item(8).await;

        tokio::time::sleep(Duration::from_millis(60)).await;

        // Exactly one flush containing all pending items
        assert_eq!(handler.batches(), vec![vec![7, 8]]);
        processor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_handlers_called_in_registration_order() {
        let processor = processor(2, Duration::from_secs(60));

        let order = Arc::new(Mutex::new(Vec::new()));

        struct OrderHandler {
            name: &'static str,
            order: Arc<Mutex<Vec<&'static str>>>,
        }

        #[async_trait]
        impl BatchHandler<u32> for OrderHandler {
            fn name(&self) -> &'static str {
                self.name
            }
            async fn handle(&self, _: &[u32]) -> std::result::Result<(), SinkError> {
                self.order.lock().push(self.name);
                Ok(())
            }
        }

        processor.register_handler(Arc::new(OrderHandler {
            name: "first",
            order: Arc::clone(&order),
        }));
        processor.register_handler(Arc::new(OrderHandler {
            name: "second",
            order: Arc::clone(&order),
        }));

        processor.add_item(1).await;
        processor.add_item(2).await;

        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_handler_failure() {
        let processor = Arc::new(
            BatchProcessor::new(
                "test",
                2,
                Duration::from_secs(60),
                RetryPolicy::linear(3, Duration::from_millis(1)),
            )
            .unwrap(),
        );
        let handler = FlakyHandler::new(2);
        processor.register_handler(handler.clone());

        processor.add_item(1).await;
        processor.add_item(2).await;

        assert_eq!(handler.calls(), 3); // 2 failures + 1 success
        let stats = processor.statistics();
        assert_eq!(stats.batches_processed, 1);
        assert_eq!(stats.batches_failed, 0);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_marks_batch_failed() {
        let processor = Arc::new(
            BatchProcessor::new(
                "test",
                2,
                Duration::from_secs(60),
                RetryPolicy::linear(2, Duration::from_millis(1)),
            )
            .unwrap(),
        );
        let handler = FlakyHandler::new(100);
        processor.register_handler(handler.clone());

        processor.add_item(1).await;
        processor.add_item(2).await;

        assert_eq!(handler.calls(), 3); // 1 initial + 2 retries
        let stats = processor.statistics();
        assert_eq!(stats.batches_failed, 1);
        assert_eq!(stats.items_failed, 2);

        // The processor keeps accepting and dispatching after a failure
        processor.add_item(3).await;
        processor.add_item(4).await;
        assert!(handler.calls() > 3);
    }

    #[tokio::test]
    async fn test_stop_flushes_remainder_and_is_idempotent() {
        let processor = processor(1000, Duration::from_secs(60));
        let handler = RecordingHandler::new("recording");
        processor.register_handler(handler.clone());
        processor.start().unwrap();

        processor.add_item(1).await;
        processor.stop().await.unwrap();

        assert_eq!(handler.batches(), vec![vec![1]]);
        assert_eq!(processor.state(), ProcessingState::Stopped);

        // Second stop is a no-op
        processor.stop().await.unwrap();
        assert_eq!(processor.state(), ProcessingState::Stopped);
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid() {
        let processor = processor(10, Duration::from_secs(60));
        processor.start().unwrap();
        assert!(matches!(
            processor.start(),
            Err(PipelineError::Transition(_))
        ));
        processor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_pause_holds_timer_flushes() {
        let processor = processor(1000, Duration::from_millis(10));
        let handler = RecordingHandler::new("recording");
        processor.register_handler(handler.clone());
        processor.start().unwrap();
        processor.pause().unwrap();

        processor.add_item(1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handler.batches().is_empty());

        processor.resume().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.batches(), vec![vec![1]]);

        processor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_configure_batch_size_effective_immediately() {
        let processor = processor(100, Duration::from_secs(60));
        let handler = RecordingHandler::new("recording");
        processor.register_handler(handler.clone());

        processor.set_batch_size(2).unwrap();
        processor.add_item(1).await;
        processor.add_item(2).await;

        assert_eq!(handler.batches(), vec![vec![1, 2]]);
        assert!(processor.set_batch_size(0).is_err());
    }

    #[tokio::test]
    async fn test_statistics_shape() {
        let processor = processor(2, Duration::from_secs(60));
        let handler = RecordingHandler::new("recording");
        processor.register_handler(handler.clone());

        for i in 0..4 {
            processor.add_item(i).await;
        }

        let stats = processor.statistics();
        assert_eq!(stats.batches_processed, 2);
        assert_eq!(stats.items_processed, 4);
        assert!((stats.avg_batch_size - 2.0).abs() < 1e-9);
        assert_eq!(stats.success_rate, 1.0);
    }
}
