//! VIRTA pipeline - event ingestion for home-automation telemetry
//!
//! Consumes a continuous stream of state-change events from a long-lived
//! push subscription, survives upstream failure through multi-endpoint
//! failover with per-endpoint circuit breaking, filters and batches events
//! locally, and persists them to a time-series sink under a bounded memory
//! ceiling with explicit overload shedding.
//!
//! # Pipeline
//!
//! ```text
//! subscription ──► EntityFilter ──► BatchProcessor ──► handlers
//!                                                        │
//!                                                        ▼
//!                                          TimeSeriesBatchWriter ──► sink
//! ```
//!
//! Delivery is at-least-once with bounded, counted loss under sustained
//! overload: a slow sink can never grow memory without limit or block the
//! event producer.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod batch;
pub mod breaker;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod filter;
pub mod fsm;
pub mod lifecycle;
pub mod metrics;
pub mod retry;
pub mod schema;
pub mod service;
pub mod stats;
pub mod writer;

pub use batch::BatchProcessor;
pub use breaker::{BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use config::{Config, LogFormat};
pub use connection::{ConnectionManager, EndpointHealth, EndpointReport, HealthProbe};
pub use endpoint::{EndpointConfig, EndpointStats, EndpointStatsSnapshot};
pub use error::{InvalidTransition, PipelineError, Result};
pub use filter::{EntityFilter, FilterConfig, FilterMode, FilterRule, FilterStats};
pub use fsm::{StateMachine, Transition};
pub use lifecycle::{
    connection_state_machine, processing_state_machine, ConnectionState, ProcessingState,
};
pub use metrics::Metrics;
pub use retry::RetryPolicy;
pub use schema::PointSchema;
pub use service::{ServiceStatistics, TelemetryService};
pub use stats::BatchStatistics;
pub use writer::{
    OverflowStrategy, TimeSeriesBatchWriter, WriterConfig, WriterStatistics,
};
