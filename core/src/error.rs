//! Error types for VIRTA sink and handler plugins

use thiserror::Error;

/// Error type for sink and handler operations
///
/// This is the standard error type returned by [`SinkClient`](crate::SinkClient)
/// and [`BatchHandler`](crate::BatchHandler) implementations. It provides
/// structured categories so the pipeline can tell transient delivery trouble
/// apart from data problems.
///
/// # Example
///
/// ```
/// use virta_core::SinkError;
///
/// fn connect_to_sink() -> Result<(), SinkError> {
///     Err(SinkError::Connection("refused".to_string()))
/// }
///
/// match connect_to_sink() {
///     Ok(_) => println!("connected"),
///     Err(SinkError::Connection(msg)) => println!("connection failed: {}", msg),
///     Err(e) => println!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Initialization failed
    ///
    /// Returned when a sink or handler fails to initialize, typically during
    /// startup. Examples: invalid configuration, missing credentials.
    #[error("initialization failed: {0}")]
    Init(String),

    /// Conversion failed
    ///
    /// Returned when an event cannot be converted into a valid point.
    /// Examples: missing identifying field, no usable field values.
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// Write failed
    ///
    /// Returned when a sink fails to persist a batch of points.
    /// Examples: network timeout, server rejected the payload.
    #[error("write failed: {0}")]
    Write(String),

    /// Connection error
    ///
    /// Returned when a network connection fails.
    /// Examples: DNS lookup failed, connection refused, TLS handshake error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Not ready
    ///
    /// Returned when a component is accessed before it is ready to handle
    /// requests, or while its circuit is open. Transient by design.
    #[error("sink not ready")]
    NotReady,

    /// Queue full
    ///
    /// Returned when backpressure rejects new data under the `drop_new`
    /// overflow policy.
    #[error("pending queue full ({0} points)")]
    QueueFull(usize),

    /// Shutdown error
    ///
    /// Returned when graceful shutdown fails.
    /// Examples: failed to flush pending points before exit.
    #[error("shutdown error: {0}")]
    Shutdown(String),
}
