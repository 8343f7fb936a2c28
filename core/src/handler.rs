//! BatchHandler trait for batch consumers

use crate::error::SinkError;
use async_trait::async_trait;

/// BatchHandler trait - consumes detached batches from the batch processor
///
/// Handlers are called in registration order with each flushed batch. A
/// handler must apply the batch atomically from its own point of view: the
/// processor retries the whole batch on failure and never re-delivers a
/// partial one.
///
/// # Example
///
/// ```
/// use virta_core::{BatchHandler, SinkError, StateEvent};
/// use async_trait::async_trait;
///
/// struct CountingHandler;
///
/// #[async_trait]
/// impl BatchHandler<StateEvent> for CountingHandler {
///     fn name(&self) -> &'static str {
///         "counting"
///     }
///
///     async fn handle(&self, batch: &[StateEvent]) -> Result<(), SinkError> {
///         println!("{} events", batch.len());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait BatchHandler<T: Send + Sync>: Send + Sync {
    /// Returns the handler's name for identification and logging
    fn name(&self) -> &'static str;

    /// Consume one flushed batch
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The batch was fully applied
    /// * `Err(SinkError)` - The batch failed as a whole; the processor
    ///   retries per its retry policy
    async fn handle(&self, batch: &[T]) -> Result<(), SinkError>;
}
