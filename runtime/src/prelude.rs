//! Convenience re-exports for wiring a pipeline
//!
//! ```ignore
//! use virta_runtime::prelude::*;
//! ```

pub use std::sync::Arc;
pub use std::time::Duration;

pub use virta_core::{
    BatchHandler, FieldValue, Point, SinkClient, SinkError, StateEvent,
};
pub use virta_pipeline::{
    BatchProcessor, BreakerConfig, Config, ConnectionManager, EndpointConfig, EntityFilter,
    FilterConfig, FilterMode, FilterRule, HealthProbe, OverflowStrategy, PointSchema,
    RetryPolicy, TelemetryService, TimeSeriesBatchWriter, WriterConfig,
};
