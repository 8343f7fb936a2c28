//! Error types for the VIRTA pipeline

use thiserror::Error;

// Re-export the plugin-facing error from virta-core
pub use virta_core::SinkError;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// An attempted state transition that is not in the machine's table
///
/// This is a programmer error: lifecycle code asked a machine to move along
/// an edge that does not exist. It is always surfaced, never swallowed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {machine} transition: {from} -> {to}")]
pub struct InvalidTransition {
    /// Which machine rejected the transition (e.g. "connection", "processing")
    pub machine: &'static str,
    /// State the machine was in
    pub from: String,
    /// State the caller asked for
    pub to: String,
}

/// Main error type for the VIRTA pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid static configuration (non-positive sizes, bad enum values)
    #[error("configuration error: {0}")]
    Config(String),

    /// Lifecycle transition outside the machine's table
    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    /// Error surfaced from a sink or handler plugin
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Every configured endpoint was skipped or failed its probe
    #[error("no healthy endpoint available")]
    NoHealthyEndpoint,

    /// Shutdown requested or failed
    #[error("shutdown: {0}")]
    Shutdown(String),
}
