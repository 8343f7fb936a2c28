//! Connection and processing lifecycles
//!
//! Two concrete instantiations of [`StateMachine`](crate::fsm::StateMachine)
//! with fixed transition tables. The connection machine tracks the upstream
//! subscription link; the processing machine tracks batching components.

use crate::fsm::StateMachine;
use serde::Serialize;
use std::fmt;

/// State of the upstream subscription link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No link and none being established
    Disconnected,
    /// Transport connection in progress
    Connecting,
    /// Transport up, credentials being exchanged
    Authenticating,
    /// Subscription live, events flowing
    Connected,
    /// Link lost, failover/reconnect in progress
    Reconnecting,
    /// Connection attempt failed; reconnect is the only way out
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Allowed edges for the connection lifecycle
const CONNECTION_TABLE: &[(ConnectionState, &[ConnectionState])] = &[
    (ConnectionState::Disconnected, &[ConnectionState::Connecting]),
    (
        ConnectionState::Connecting,
        &[ConnectionState::Authenticating, ConnectionState::Failed],
    ),
    (
        ConnectionState::Authenticating,
        &[ConnectionState::Connected, ConnectionState::Failed],
    ),
    (
        ConnectionState::Connected,
        &[ConnectionState::Reconnecting, ConnectionState::Disconnected],
    ),
    (
        ConnectionState::Reconnecting,
        &[ConnectionState::Connecting, ConnectionState::Failed],
    ),
    (ConnectionState::Failed, &[ConnectionState::Reconnecting]),
];

/// Build the connection state machine, starting disconnected
pub fn connection_state_machine() -> StateMachine<ConnectionState> {
    StateMachine::new("connection", ConnectionState::Disconnected, CONNECTION_TABLE)
}

/// State of a batching component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    /// Not running; clean initial and terminal state
    Stopped,
    /// Spawning background tasks
    Starting,
    /// Accepting and flushing batches
    Running,
    /// Accepting items but holding flushes
    Paused,
    /// Draining pending state before stop
    Stopping,
    /// A startup or dispatch failure; restart or stop to recover
    Error,
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessingState::Stopped => "stopped",
            ProcessingState::Starting => "starting",
            ProcessingState::Running => "running",
            ProcessingState::Paused => "paused",
            ProcessingState::Stopping => "stopping",
            ProcessingState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Allowed edges for the processing lifecycle
const PROCESSING_TABLE: &[(ProcessingState, &[ProcessingState])] = &[
    (ProcessingState::Stopped, &[ProcessingState::Starting]),
    (
        ProcessingState::Starting,
        &[ProcessingState::Running, ProcessingState::Error],
    ),
    (
        ProcessingState::Running,
        &[
            ProcessingState::Paused,
            ProcessingState::Stopping,
            ProcessingState::Error,
        ],
    ),
    (
        ProcessingState::Paused,
        &[ProcessingState::Running, ProcessingState::Stopping],
    ),
    (ProcessingState::Stopping, &[ProcessingState::Stopped]),
    (
        ProcessingState::Error,
        &[ProcessingState::Stopped, ProcessingState::Starting],
    ),
];

/// Build the processing state machine, starting stopped
pub fn processing_state_machine() -> StateMachine<ProcessingState> {
    StateMachine::new("processing", ProcessingState::Stopped, PROCESSING_TABLE)
}
