//! Error types for queued transactions.

use thiserror::Error;
use walletd_types::TicketId;

/// Outcome errors of a transaction send.
///
/// Stored in the ticket's error slot; the waiting caller observes it after
/// the completion signal fires.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendTxError {
    /// Signing credentials were wrong. The ticket stays queued so the user
    /// can retry.
    #[error("invalid signing credentials")]
    InvalidCredentials,

    /// The node refused the transaction.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// The RPC call itself failed.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// No running node to send through.
    #[error("node is not running")]
    NodeUnavailable,

    /// The request was discarded before it was sent.
    #[error("transaction discarded")]
    Discarded,

    /// The caller's context expired before the transaction was sent.
    #[error("transaction timed out")]
    TimedOut,
}

impl SendTxError {
    /// Whether the worker should release its claim and leave the ticket
    /// queued instead of completing it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidCredentials | Self::NodeUnavailable)
    }
}

/// Errors from the ticket queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("transaction queue is full ({capacity} entries)")]
    Full { capacity: usize },

    #[error("ticket {0} is already queued")]
    Duplicate(TicketId),

    #[error("ticket {0} not found")]
    NotFound(TicketId),
}
