//! Configuration from environment variables
//!
//! All knobs carry working defaults; the pipeline starts with an empty
//! environment. Invalid values (unparseable, or zero where a positive value
//! is required) fail loading - bad static configuration is the one error
//! class that surfaces synchronously.

use crate::error::{PipelineError, Result};
use crate::retry::RetryPolicy;
use crate::writer::{OverflowStrategy, WriterConfig};
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Structured JSON lines (production)
    Json,
    /// Human-readable output (development)
    Pretty,
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Log filter directive (e.g. "info", "virta_pipeline=debug")
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Events per batch on the event side
    pub batch_size: usize,
    /// Upper bound on time between flushes
    pub batch_timeout: Duration,
    /// Writer pending-queue ceiling
    pub max_pending_points: usize,
    /// Writer overflow policy
    pub overflow_strategy: OverflowStrategy,
    /// Dispatch/write retries after the initial attempt
    pub retry_attempts: u32,
    /// Linear backoff base delay
    pub retry_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            batch_size: 100,
            batch_timeout: Duration::from_secs(5),
            max_pending_points: 10_000,
            overflow_strategy: OverflowStrategy::DropOldest,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl Config {
    /// Load configuration from `VIRTA_*` environment variables
    ///
    /// Unset variables keep their defaults; set-but-invalid variables are
    /// errors, not silent fallbacks.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("VIRTA_LOG_LEVEL") {
            config.log_level = level;
        }
        if let Ok(format) = std::env::var("VIRTA_LOG_FORMAT") {
            config.log_format = match format.as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(PipelineError::Config(format!(
                        "VIRTA_LOG_FORMAT must be 'json' or 'pretty', got '{other}'"
                    )))
                }
            };
        }

        config.batch_size = parse_positive("VIRTA_BATCH_SIZE", config.batch_size)?;
        config.batch_timeout = Duration::from_millis(parse_positive(
            "VIRTA_BATCH_TIMEOUT_MS",
            config.batch_timeout.as_millis() as u64,
        )?);
        config.max_pending_points =
            parse_positive("VIRTA_MAX_PENDING_POINTS", config.max_pending_points)?;

        if let Ok(strategy) = std::env::var("VIRTA_OVERFLOW_STRATEGY") {
            config.overflow_strategy = match strategy.as_str() {
                "drop_oldest" => OverflowStrategy::DropOldest,
                "drop_new" => OverflowStrategy::DropNew,
                other => {
                    return Err(PipelineError::Config(format!(
                        "VIRTA_OVERFLOW_STRATEGY must be 'drop_oldest' or 'drop_new', got '{other}'"
                    )))
                }
            };
        }

        // Zero retries is a legal choice; only parse failures are errors
        if let Ok(attempts) = std::env::var("VIRTA_RETRY_ATTEMPTS") {
            config.retry_attempts = attempts.parse().map_err(|_| {
                PipelineError::Config(format!(
                    "VIRTA_RETRY_ATTEMPTS must be a number, got '{attempts}'"
                ))
            })?;
        }
        config.retry_delay = Duration::from_millis(parse_positive(
            "VIRTA_RETRY_DELAY_MS",
            config.retry_delay.as_millis() as u64,
        )?);

        Ok(config)
    }

    /// The retry policy this configuration describes
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(self.retry_attempts, self.retry_delay)
    }

    /// The writer configuration this configuration describes
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            batch_size: self.batch_size,
            batch_timeout: self.batch_timeout,
            max_pending_points: self.max_pending_points,
            overflow_strategy: self.overflow_strategy,
            retry: self.retry_policy(),
        }
    }
}

/// Parse an env var into a positive integer, keeping `default` when unset
fn parse_positive<N>(name: &str, default: N) -> Result<N>
where
    N: std::str::FromStr + PartialOrd + From<u8>,
{
    match std::env::var(name) {
        Ok(value) => {
            let parsed: N = value.parse().map_err(|_| {
                PipelineError::Config(format!("{name} must be a number, got '{value}'"))
            })?;
            if parsed <= N::from(0u8) {
                return Err(PipelineError::Config(format!("{name} must be > 0")));
            }
            Ok(parsed)
        }
        Err(_) => Ok(default),
    }
}
