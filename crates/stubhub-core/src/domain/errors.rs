//! Errors - エラー型と分類
//!
//! Every failure here is local to one stub: nothing is fatal to the broker.

use std::time::Duration;

use thiserror::Error;

use super::descriptor::MessageType;
use super::ids::ConnectionId;
use super::roster::ClientId;

/// Failures reported by a `BusConnector`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("bus unreachable: {0}")]
    Unreachable(String),

    #[error("bus rejected the request: {0}")]
    Rejected(String),

    #[error("sending to {recipient} failed: {reason}")]
    SendFailed { recipient: ClientId, reason: String },

    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

/// Failures reported by a `ProcessLauncher` when a launch cannot even start.
///
/// A process that starts and then fails is not an error here: it is reported
/// through `LaunchOutcome`.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("launch command is empty")]
    EmptyCommand,

    #[error("failed to spawn '{program}' for '{locator}': {source}")]
    Spawn {
        program: String,
        locator: String,
        #[source]
        source: std::io::Error,
    },

    #[error("launcher is shut down")]
    Closed,
}

/// Failures surfaced to broker callers.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unknown stub '{0}'")]
    UnknownStub(String),

    #[error("stub '{0}' is not connected to the bus")]
    NotConnected(String),

    #[error("stub '{0}' failed to launch its application")]
    LaunchFailed(String),

    #[error("no stub routes '{mtype}' for connection {recipient}")]
    Unroutable {
        mtype: MessageType,
        recipient: ConnectionId,
    },

    #[error("broker is shut down")]
    ShutDown,

    #[error("broker is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Catalog(#[from] crate::catalog::CatalogError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}
