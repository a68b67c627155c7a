//! Error types for node management.

use thiserror::Error;
use walletd_core::{QueueError, SendTxError};
use walletd_types::{PeerAddressError, TicketId};

/// Errors reported by a node backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("node is not started")]
    NotStarted,

    #[error("node is already started")]
    AlreadyStarted,

    #[error("services cannot be registered on a running node")]
    RegistrationClosed,

    #[error("service {0} failed: {1}")]
    Service(&'static str, String),

    #[error("{0}")]
    Backend(String),
}

/// Errors from the RPC client and transports.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("failed to attach to node: {0}")]
    Attach(#[source] NodeError),

    #[error("invalid upstream url: {0}")]
    InvalidUpstream(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("transport closed")]
    Closed,
}

/// Errors from [`NodeManager`](crate::NodeManager) operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("node is already running")]
    AlreadyRunning,

    #[error("there is no running node")]
    NotRunning,

    #[error("node start failure: {0}")]
    StartFailure(#[source] NodeError),

    #[error("failed to init RPC client: {0}")]
    ClientInitFailure(#[source] RpcError),

    /// Stop failed; the node stays registered so stop can be retried.
    #[error(transparent)]
    StopFailure(NodeError),

    #[error("relay service is unavailable")]
    RelayUnavailable,

    #[error("light sync service is unavailable")]
    LightSyncUnavailable,

    #[error("invalid peer address: {0}")]
    ParseError(#[from] PeerAddressError),
}

/// Errors from the transaction dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Another worker holds the ticket.
    #[error("transaction {0} is already in progress")]
    InProgress(TicketId),

    /// The send was attempted and failed.
    #[error(transparent)]
    Send(#[from] SendTxError),
}

/// Errors from logging control.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid log filter {directive:?}: {source}")]
    InvalidFilter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("failed to reload log filter: {0}")]
    Reload(String),

    #[error("a global subscriber is already installed")]
    AlreadyInstalled,
}
