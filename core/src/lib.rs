//! virta-core - Core types for the VIRTA telemetry pipe
//!
//! This crate provides the foundational types shared between the VIRTA
//! pipeline and external plugins (sink clients, batch handlers):
//!
//! - [`StateEvent`] - one home-automation state change (entity id, domain,
//!   state value, timestamped attribute map)
//! - [`Point`] - one validated time-series datum ready for a sink write
//! - [`SinkClient`] trait - async interface to the downstream time-series sink
//! - [`BatchHandler`] trait - async interface for batch consumers
//! - [`SinkError`] - error type for sink and handler operations
//!
//! # Why this crate exists
//!
//! External sink implementations (an InfluxDB client, a VictoriaMetrics
//! client, a test double) need [`Point`] and the [`SinkClient`] trait without
//! pulling in the whole pipeline. Keeping the leaf types here breaks the
//! cycle: the pipeline depends on virta-core, and so do the sinks.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

mod error;
mod handler;
mod sink;
/// The state-change event record
pub mod event;
/// Time-series points and line-protocol rendering
pub mod point;

pub use error::SinkError;
pub use event::StateEvent;
pub use handler::BatchHandler;
pub use point::{FieldValue, Fields, Point, Tags};
pub use sink::SinkClient;
