//! SinkClient trait for time-series destinations
//!
//! The [`SinkClient`] trait defines the interface the batch writer uses to
//! persist points. The sink is a consumed collaborator: VIRTA ships test
//! doubles, real clients live in their own crates.

use crate::error::SinkError;
use crate::point::Point;
use async_trait::async_trait;

/// SinkClient trait - writes Points to a time-series destination
///
/// # Implementation Requirements
///
/// - Implementations must be `Send + Sync` for use across async tasks
/// - `write` receives a batch and should apply it atomically or fail whole;
///   the writer treats a returned error as "none of these points landed"
///   and retries the full batch (at-least-once delivery)
/// - Health checks should be lightweight and not affect the data path
///
/// # Example
///
/// ```ignore
/// use virta_core::{Point, SinkClient, SinkError};
/// use async_trait::async_trait;
///
/// struct HttpSink {
///     client: reqwest::Client,
///     write_url: String,
/// }
///
/// #[async_trait]
/// impl SinkClient for HttpSink {
///     fn name(&self) -> &'static str {
///         "http"
///     }
///
///     async fn write(&self, points: &[Point]) -> Result<(), SinkError> {
///         let body: String = points
///             .iter()
///             .map(|p| p.to_line_protocol())
///             .collect::<Vec<_>>()
///             .join("\n");
///
///         self.client.post(&self.write_url)
///             .body(body)
///             .send()
///             .await
///             .map_err(|e| SinkError::Write(e.to_string()))?;
///
///         Ok(())
///     }
///
///     async fn health(&self) -> bool {
///         true
///     }
/// }
/// ```
#[async_trait]
pub trait SinkClient: Send + Sync {
    /// Returns the sink's name for identification and logging
    fn name(&self) -> &'static str;

    /// Write a batch of points to the destination
    ///
    /// # Arguments
    ///
    /// * `points` - Slice of points to persist. May be empty.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The whole batch was persisted
    /// * `Err(SinkError)` - The batch failed; the caller decides on retry
    async fn write(&self, points: &[Point]) -> Result<(), SinkError>;

    /// Check if the destination is reachable and accepting writes
    ///
    /// Called for diagnostics; should be cheap and never block for long.
    async fn health(&self) -> bool;

    /// Graceful shutdown
    ///
    /// Called when the pipeline stops. Implementations should flush their
    /// own buffers and release connections. The default is a no-op.
    async fn shutdown(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
