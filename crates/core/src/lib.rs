//! Queued transaction tickets.
//!
//! A transaction-send request enters a "waiting for approval" state as a
//! [`QueuedTx`] held by a [`TxQueue`]. The caller waits on the ticket; a
//! separate worker claims it, sends it and completes it; a canceller may
//! discard it while it is still unclaimed.
//!
//! # Components
//!
//! - [`Signal`] - one-shot, multi-waiter wake primitive
//! - [`RequestContext`] - caller-supplied cancellation and deadline
//! - [`QueuedTx`] - the ticket: state, single-flight claim, two signals
//! - [`TxQueue`] - registry keyed by [`walletd_types::TicketId`]

mod context;
mod error;
mod queue;
mod signal;
mod ticket;

pub use context::{ContextError, RequestContext};
pub use error::{QueueError, SendTxError};
pub use queue::{TxQueue, DEFAULT_QUEUE_CAPACITY};
pub use signal::Signal;
pub use ticket::{QueuedTx, TicketOutcome};
