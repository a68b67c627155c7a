//! Worker path from queued tickets to the running node.

use crate::error::{DispatchError, RpcError};
use crate::manager::NodeManager;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use walletd_core::{QueueError, QueuedTx, RequestContext, SendTxError, TicketOutcome, TxQueue};
use walletd_types::{Hash, SendTxArgs, TicketId};

/// Sends queued transactions through the manager's RPC client.
#[derive(Debug, Clone)]
pub struct TxDispatcher {
    manager: Arc<NodeManager>,
    queue: Arc<TxQueue>,
}

impl TxDispatcher {
    pub fn new(manager: Arc<NodeManager>, queue: Arc<TxQueue>) -> Self {
        Self { manager, queue }
    }

    pub fn queue(&self) -> &Arc<TxQueue> {
        &self.queue
    }

    /// Create a ticket for `args` and put it in the queue.
    pub fn queue_transaction(
        &self,
        ctx: RequestContext,
        args: SendTxArgs,
    ) -> Result<Arc<QueuedTx>, QueueError> {
        let tx = QueuedTx::new_shared(TicketId::random(), ctx, args);
        self.queue.enqueue(Arc::clone(&tx))?;
        Ok(tx)
    }

    /// Send a queued transaction through the node.
    pub fn complete_transaction(&self, id: TicketId) -> Result<Hash, DispatchError> {
        self.complete_with(id, |args| self.send(args))
    }

    /// Claim a ticket, run `send` on its arguments and record the result.
    ///
    /// Recoverable failures hand the claim back so the ticket can be
    /// completed again; any other result finishes the ticket.
    pub fn complete_with<F>(&self, id: TicketId, send: F) -> Result<Hash, DispatchError>
    where
        F: FnOnce(&SendTxArgs) -> Result<Hash, SendTxError>,
    {
        let tx = self.queue.get(id)?;
        if !tx.try_claim(true) {
            return Err(Self::unclaimable(&tx, id));
        }

        match send(&tx.args()) {
            Err(err) if err.is_recoverable() => {
                tx.try_claim(false);
                warn!(ticket = %id, error = %err, "Send failed, ticket released");
                Err(err.into())
            }
            result => {
                if !tx.complete(result.clone()) {
                    warn!(ticket = %id, "Ticket finished while the send was in flight");
                    return Err(Self::unclaimable(&tx, id));
                }
                match &result {
                    Ok(hash) => info!(ticket = %id, hash = %hash, "Transaction completed"),
                    Err(err) => warn!(ticket = %id, error = %err, "Transaction failed"),
                }
                result.map_err(Into::into)
            }
        }
    }

    fn unclaimable(tx: &QueuedTx, id: TicketId) -> DispatchError {
        if tx.discarded().is_fired() {
            SendTxError::Discarded.into()
        } else {
            DispatchError::InProgress(id)
        }
    }

    fn send(&self, args: &SendTxArgs) -> Result<Hash, SendTxError> {
        let client = self
            .manager
            .rpc_client()
            .map_err(|_| SendTxError::NodeUnavailable)?;
        client
            .call_typed::<Hash>("eth_sendTransaction", json!([args]))
            .map_err(|e| match e {
                RpcError::Rejected(reason) => SendTxError::Rejected(reason),
                other => SendTxError::Rpc(other.to_string()),
            })
    }

    /// Discard a ticket no worker has claimed.
    pub fn discard_transaction(&self, id: TicketId) -> Result<bool, QueueError> {
        self.queue.discard(id)
    }

    /// Wait for a ticket's outcome.
    pub async fn wait(&self, id: TicketId) -> Result<TicketOutcome, QueueError> {
        self.queue.wait(id).await
    }

    /// Discard every unclaimed ticket. Returns how many were discarded.
    pub fn shutdown(&self) -> usize {
        self.queue.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalNodeFactory;
    use std::time::Duration;
    use walletd_types::{Address, NodeConfig};

    fn setup() -> TxDispatcher {
        let manager = NodeManager::new(Arc::new(LocalNodeFactory));
        manager.start(NodeConfig::default()).unwrap();
        TxDispatcher::new(manager, Arc::new(TxQueue::new(8)))
    }

    fn transfer(from: u8) -> SendTxArgs {
        SendTxArgs::transfer(Address([from; 20]), Address([9; 20]), 100)
    }

    #[tokio::test]
    async fn test_complete_and_wait() {
        let dispatcher = setup();
        let tx = dispatcher
            .queue_transaction(RequestContext::background(), transfer(1))
            .unwrap();

        let hash = dispatcher.complete_transaction(tx.id()).unwrap();
        assert!(!hash.is_zero());
        assert_eq!(tx.hash(), hash);

        let outcome = dispatcher.wait(tx.id()).await.unwrap();
        assert_eq!(outcome, TicketOutcome::Sent(hash));
        assert!(!dispatcher.queue().has(tx.id()));
    }

    #[tokio::test]
    async fn test_rejected_send_finishes_ticket() {
        let dispatcher = setup();
        let tx = dispatcher
            .queue_transaction(RequestContext::background(), transfer(0))
            .unwrap();

        let err = dispatcher.complete_transaction(tx.id()).unwrap_err();
        assert!(matches!(err, DispatchError::Send(SendTxError::Rejected(_))));
        assert!(matches!(
            dispatcher.wait(tx.id()).await.unwrap(),
            TicketOutcome::Failed(SendTxError::Rejected(_))
        ));
    }

    #[test]
    fn test_recoverable_failure_releases_claim() {
        let dispatcher = setup();
        let tx = dispatcher
            .queue_transaction(RequestContext::background(), transfer(1))
            .unwrap();

        let err = dispatcher
            .complete_with(tx.id(), |_| Err(SendTxError::InvalidCredentials))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Send(SendTxError::InvalidCredentials)));
        assert!(!tx.in_progress());
        assert!(!tx.is_finished());

        // Retry succeeds.
        dispatcher.complete_transaction(tx.id()).unwrap();
        assert!(tx.done().is_fired());
    }

    #[test]
    fn test_node_down_is_recoverable() {
        let dispatcher = setup();
        let tx = dispatcher
            .queue_transaction(RequestContext::background(), transfer(1))
            .unwrap();
        dispatcher.manager.stop().unwrap();

        assert!(matches!(
            dispatcher.complete_transaction(tx.id()),
            Err(DispatchError::Send(SendTxError::NodeUnavailable))
        ));
        assert!(!tx.in_progress());
    }

    #[test]
    fn test_claim_conflict() {
        let dispatcher = setup();
        let tx = dispatcher
            .queue_transaction(RequestContext::background(), transfer(1))
            .unwrap();
        assert!(tx.try_claim(true));

        assert!(matches!(
            dispatcher.complete_transaction(tx.id()),
            Err(DispatchError::InProgress(_))
        ));
    }

    #[test]
    fn test_discarded_ticket_cannot_complete() {
        let dispatcher = setup();
        let tx = dispatcher
            .queue_transaction(RequestContext::background(), transfer(1))
            .unwrap();
        assert!(dispatcher.discard_transaction(tx.id()).unwrap());
        assert!(matches!(
            dispatcher.complete_transaction(tx.id()),
            Err(DispatchError::Send(SendTxError::Discarded))
        ));
        assert!(matches!(
            dispatcher.complete_transaction(TicketId(0)),
            Err(DispatchError::Queue(QueueError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_released_discarded_ticket_is_not_sent() {
        let dispatcher = setup();
        let tx = dispatcher
            .queue_transaction(RequestContext::background(), transfer(1))
            .unwrap();
        assert!(dispatcher.discard_transaction(tx.id()).unwrap());
        assert!(!tx.try_claim(false));

        let sent = std::cell::Cell::new(false);
        let err = dispatcher
            .complete_with(tx.id(), |_| {
                sent.set(true);
                Ok(Hash::from_bytes(b"never"))
            })
            .unwrap_err();
        assert!(matches!(err, DispatchError::Send(SendTxError::Discarded)));
        assert!(!sent.get());
        assert!(matches!(
            dispatcher.complete_transaction(tx.id()),
            Err(DispatchError::Send(SendTxError::Discarded))
        ));
        assert!(tx.hash().is_zero());
        assert_eq!(dispatcher.wait(tx.id()).await.unwrap(), TicketOutcome::Discarded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_pending() {
        let dispatcher = setup();
        let pending = dispatcher
            .queue_transaction(RequestContext::with_timeout(Duration::from_secs(60)), transfer(1))
            .unwrap();
        let claimed = dispatcher
            .queue_transaction(RequestContext::background(), transfer(2))
            .unwrap();
        assert!(claimed.try_claim(true));

        assert_eq!(dispatcher.shutdown(), 1);
        assert!(pending.discarded().is_fired());
        assert_eq!(pending.wait().await, TicketOutcome::Discarded);
        assert!(!claimed.is_finished());
    }
}
