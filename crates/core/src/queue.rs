//! Registry of queued transactions keyed by ticket ID.

use crate::error::QueueError;
use crate::ticket::{QueuedTx, TicketOutcome};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use walletd_types::TicketId;

/// Default maximum number of queued transactions.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Transactions waiting for approval.
///
/// Owns every ticket from enqueue until its waiter has consumed an outcome.
/// Lookups hand out `Arc` clones so a worker can operate on a ticket without
/// holding the registry lock.
#[derive(Debug)]
pub struct TxQueue {
    tickets: RwLock<HashMap<TicketId, Arc<QueuedTx>>>,
    capacity: usize,
}

impl Default for TxQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl TxQueue {
    /// Create a queue holding at most `capacity` tickets.
    pub fn new(capacity: usize) -> Self {
        Self {
            tickets: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Maximum number of tickets.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add a ticket.
    ///
    /// A full queue first evicts finished tickets nobody has collected.
    pub fn enqueue(&self, tx: Arc<QueuedTx>) -> Result<(), QueueError> {
        let id = tx.id();
        let mut tickets = self.tickets.write();
        if tickets.contains_key(&id) {
            return Err(QueueError::Duplicate(id));
        }
        if tickets.len() >= self.capacity {
            let before = tickets.len();
            tickets.retain(|_, tx| !tx.is_finished());
            if tickets.len() < before {
                debug!(evicted = before - tickets.len(), "Evicted finished transactions");
            }
        }
        if tickets.len() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }
        tickets.insert(id, tx);
        info!(ticket = %id, queued = tickets.len(), "Transaction queued");
        Ok(())
    }

    /// Look up a ticket.
    pub fn get(&self, id: TicketId) -> Result<Arc<QueuedTx>, QueueError> {
        self.tickets
            .read()
            .get(&id)
            .cloned()
            .ok_or(QueueError::NotFound(id))
    }

    /// Whether a ticket is queued.
    pub fn has(&self, id: TicketId) -> bool {
        self.tickets.read().contains_key(&id)
    }

    /// Remove a ticket, returning it if present.
    pub fn remove(&self, id: TicketId) -> Option<Arc<QueuedTx>> {
        let removed = self.tickets.write().remove(&id);
        if removed.is_some() {
            debug!(ticket = %id, "Transaction removed from queue");
        }
        removed
    }

    /// Number of queued tickets.
    pub fn count(&self) -> usize {
        self.tickets.read().len()
    }

    /// Explicitly discard a ticket.
    ///
    /// Returns `Ok(false)` if a worker already holds it; the ticket then
    /// finishes through its completion signal instead.
    pub fn discard(&self, id: TicketId) -> Result<bool, QueueError> {
        let tx = self.get(id)?;
        let discarded = tx.discard();
        if discarded {
            info!(ticket = %id, "Transaction discarded");
        } else {
            debug!(ticket = %id, "Discard skipped, transaction is in progress or finished");
        }
        Ok(discarded)
    }

    /// Wait for a ticket's outcome, then remove it from the queue.
    ///
    /// Dropping the future before it resolves discards the ticket if no
    /// worker holds it, and removes it either way.
    pub async fn wait(&self, id: TicketId) -> Result<TicketOutcome, QueueError> {
        let tx = self.get(id)?;
        let _guard = WaitGuard {
            queue: self,
            tx: &tx,
            id,
        };
        let outcome = tx.wait().await;
        debug!(ticket = %id, ?outcome, "Transaction finished");
        Ok(outcome)
    }

    /// Discard every unclaimed ticket and empty the queue.
    ///
    /// Claimed tickets are dropped from the queue but left to their workers,
    /// which still fire `done` on the ticket the waiter holds. Returns the
    /// number of tickets discarded.
    pub fn reset(&self) -> usize {
        let drained: Vec<_> = self.tickets.write().drain().collect();
        let total = drained.len();
        let discarded = drained.iter().filter(|(_, tx)| tx.discard()).count();
        info!(total, discarded, "Transaction queue reset");
        discarded
    }
}

/// Removes a waited-on ticket when its waiter goes away.
struct WaitGuard<'a> {
    queue: &'a TxQueue,
    tx: &'a QueuedTx,
    id: TicketId,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if !self.tx.is_finished() && self.tx.discard() {
            info!(ticket = %self.id, "Waiter went away, transaction discarded");
        }
        self.queue.remove(self.id);
    }
}
