//! Queued transaction ticket.
//!
//! A [`QueuedTx`] tracks one transaction-send request from the moment it is
//! queued until the user approves it (a worker sends it and fires `done`) or
//! it is dropped (someone fires `discarded`).
//!
//! # Protocol
//!
//! ```text
//!  caller                 worker                      canceller
//!    │ new + enqueue        │                             │
//!    │ wait() ─────────┐    │ try_claim(true) == true     │
//!    │                 │    │ ...send...                  │ discard()
//!    │                 │    │ complete(result) ─► done    │   └─ only if unclaimed
//!    │ ◄── outcome ────┘    │                             │      ─► discarded
//! ```
//!
//! The `in_progress` flag is the single authority on who may finish a
//! ticket: a worker must win `try_claim(true)` before it completes, and
//! `discard()` only fires if it can take the claim itself. At most one of
//! the two signals ever fires.

use crate::context::{ContextError, RequestContext};
use crate::error::SendTxError;
use crate::signal::Signal;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Notify;
use walletd_types::{Hash, SendTxArgs, TicketId};

/// Final outcome observed by the caller waiting on a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketOutcome {
    /// Sent successfully.
    Sent(Hash),
    /// The send was attempted and failed.
    Failed(SendTxError),
    /// Discarded before any worker claimed it.
    Discarded,
    /// The caller's deadline passed before any worker claimed it.
    TimedOut,
    /// The caller's context was cancelled before any worker claimed it.
    Cancelled,
}

impl TicketOutcome {
    /// Collapse into a send result.
    pub fn into_result(self) -> Result<Hash, SendTxError> {
        match self {
            TicketOutcome::Sent(hash) => Ok(hash),
            TicketOutcome::Failed(err) => Err(err),
            TicketOutcome::Discarded | TicketOutcome::Cancelled => Err(SendTxError::Discarded),
            TicketOutcome::TimedOut => Err(SendTxError::TimedOut),
        }
    }
}

#[derive(Debug)]
struct TxState {
    id: TicketId,
    hash: Hash,
    ctx: RequestContext,
    args: SendTxArgs,
    in_progress: bool,
    done: Signal,
    discarded: Signal,
    err: Option<SendTxError>,
}

/// Holds enough information to complete a queued transaction.
///
/// Every field sits behind the ticket's own lock; unrelated tickets never
/// contend with each other.
#[derive(Debug)]
pub struct QueuedTx {
    state: RwLock<TxState>,
    /// Woken when a claim is released, so a caller whose context expired
    /// while a worker held the claim can retry the discard.
    released: Notify,
}

impl QueuedTx {
    /// Create a ticket. No side effects beyond allocation.
    pub fn new(id: TicketId, ctx: RequestContext, args: SendTxArgs) -> Self {
        Self {
            state: RwLock::new(TxState {
                id,
                hash: Hash::ZERO,
                ctx,
                args,
                in_progress: false,
                done: Signal::new(),
                discarded: Signal::new(),
                err: None,
            }),
            released: Notify::new(),
        }
    }

    /// Create a shared ticket.
    pub fn new_shared(id: TicketId, ctx: RequestContext, args: SendTxArgs) -> Arc<Self> {
        Arc::new(Self::new(id, ctx, args))
    }

    pub fn id(&self) -> TicketId {
        self.state.read().id
    }

    /// Reassign the identifier. Only the owning queue does this, before the
    /// ticket is first waited on.
    pub fn set_id(&self, id: TicketId) {
        self.state.write().id = id;
    }

    /// Hash of the sent transaction; zero until a successful send.
    pub fn hash(&self) -> Hash {
        self.state.read().hash
    }

    pub fn set_hash(&self, hash: Hash) {
        self.state.write().hash = hash;
    }

    pub fn context(&self) -> RequestContext {
        self.state.read().ctx.clone()
    }

    /// Replace the context. Precondition: no worker has claimed the ticket.
    pub fn set_context(&self, ctx: RequestContext) {
        self.state.write().ctx = ctx;
    }

    pub fn args(&self) -> SendTxArgs {
        self.state.read().args.clone()
    }

    /// Replace the send arguments (e.g. gas or nonce adjustment).
    /// Precondition: no worker has claimed the ticket.
    pub fn set_args(&self, args: SendTxArgs) {
        self.state.write().args = args;
    }

    pub fn err(&self) -> Option<SendTxError> {
        self.state.read().err.clone()
    }

    pub fn set_err(&self, err: Option<SendTxError>) {
        self.state.write().err = err;
    }

    /// Whether a worker currently holds the claim.
    pub fn in_progress(&self) -> bool {
        self.state.read().in_progress
    }

    /// Compare-and-swap on the in-progress flag.
    ///
    /// Returns `false` without changing anything if the flag already equals
    /// `desired` or the ticket has finished; otherwise sets it and returns
    /// `true`. A worker may only send after `try_claim(true)` returned `true`;
    /// it calls `try_claim(false)` to hand the ticket back after a recoverable
    /// failure. A finished ticket keeps its claim for good.
    pub fn try_claim(&self, desired: bool) -> bool {
        let mut state = self.state.write();
        if state.in_progress == desired || state.done.is_fired() || state.discarded.is_fired() {
            return false;
        }
        state.in_progress = desired;
        drop(state);

        if !desired {
            self.released.notify_waiters();
        }
        true
    }

    /// Completion signal handle.
    pub fn done(&self) -> Signal {
        self.state.read().done.clone()
    }

    /// Discard signal handle.
    pub fn discarded(&self) -> Signal {
        self.state.read().discarded.clone()
    }

    /// Whether either signal has fired.
    pub fn is_finished(&self) -> bool {
        let state = self.state.read();
        state.done.is_fired() || state.discarded.is_fired()
    }

    /// Store the send result and fire `done`.
    ///
    /// The caller must hold the claim. Returns `false` and changes nothing if
    /// the claim is not held or the ticket already finished.
    pub fn complete(&self, result: Result<Hash, SendTxError>) -> bool {
        let mut state = self.state.write();
        if !state.in_progress || state.done.is_fired() || state.discarded.is_fired() {
            return false;
        }
        match result {
            Ok(hash) => {
                state.hash = hash;
                state.err = None;
            }
            Err(err) => state.err = Some(err),
        }
        state.done.fire()
    }

    /// Discard the ticket if no worker holds it.
    ///
    /// Takes the claim and fires `discarded` in one exclusive section.
    /// Returns `false` if a worker already claimed it or it already finished;
    /// the caller must then wait for `done` instead.
    pub fn discard(&self) -> bool {
        self.discard_with(SendTxError::Discarded)
    }

    fn discard_with(&self, err: SendTxError) -> bool {
        let mut state = self.state.write();
        if state.in_progress || state.done.is_fired() || state.discarded.is_fired() {
            return false;
        }
        state.in_progress = true;
        state.err = Some(err);
        state.discarded.fire()
    }

    /// Wait for the ticket to finish.
    ///
    /// Waits on `done`, `discarded` and the ticket's context. When the
    /// context ends first, the ticket is discarded if still unclaimed;
    /// otherwise the worker's result is awaited.
    pub async fn wait(&self) -> TicketOutcome {
        let (done, discarded, ctx) = {
            let state = self.state.read();
            (state.done.clone(), state.discarded.clone(), state.ctx.clone())
        };

        let reason = tokio::select! {
            biased;
            _ = done.wait() => return self.completed_outcome(),
            _ = discarded.wait() => return TicketOutcome::Discarded,
            reason = ctx.done() => reason,
        };

        let (err, outcome) = match reason {
            ContextError::DeadlineExceeded => (SendTxError::TimedOut, TicketOutcome::TimedOut),
            ContextError::Cancelled => (SendTxError::Discarded, TicketOutcome::Cancelled),
        };

        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if self.discard_with(err.clone()) {
                return outcome;
            }

            tokio::select! {
                biased;
                _ = done.wait() => return self.completed_outcome(),
                _ = discarded.wait() => return TicketOutcome::Discarded,
                _ = released => continue,
            }
        }
    }

    fn completed_outcome(&self) -> TicketOutcome {
        let state = self.state.read();
        match &state.err {
            Some(err) => TicketOutcome::Failed(err.clone()),
            None => TicketOutcome::Sent(state.hash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;
    use walletd_types::Address;

    fn test_tx(ctx: RequestContext) -> Arc<QueuedTx> {
        let args = SendTxArgs::transfer(Address([1; 20]), Address([2; 20]), 10);
        QueuedTx::new_shared(TicketId(1), ctx, args)
    }

    #[test]
    fn test_new_ticket_is_empty() {
        let tx = test_tx(RequestContext::background());
        assert_eq!(tx.id(), TicketId(1));
        assert!(tx.hash().is_zero());
        assert!(tx.err().is_none());
        assert!(!tx.in_progress());
        assert!(!tx.done().is_fired());
        assert!(!tx.discarded().is_fired());
    }

    #[test]
    fn test_accessors() {
        let tx = test_tx(RequestContext::background());
        tx.set_id(TicketId(9));
        assert_eq!(tx.id(), TicketId(9));

        let args = tx.args().with_gas(50_000).with_nonce(4);
        tx.set_args(args.clone());
        assert_eq!(tx.args(), args);

        let hash = Hash::from_bytes(b"h");
        tx.set_hash(hash);
        assert_eq!(tx.hash(), hash);

        tx.set_err(Some(SendTxError::Rpc("boom".into())));
        assert_eq!(tx.err(), Some(SendTxError::Rpc("boom".into())));

        let ctx = RequestContext::background();
        tx.set_context(ctx.clone());
        ctx.cancel();
        assert!(tx.context().is_done());
    }

    #[test]
    fn test_try_claim_compare_and_swap() {
        let tx = test_tx(RequestContext::background());
        assert!(!tx.try_claim(false), "already not in progress");
        assert!(tx.try_claim(true));
        assert!(tx.in_progress());
        assert!(!tx.try_claim(true), "second claim must fail");
        assert!(tx.try_claim(false), "release after failed attempt");
        assert!(tx.try_claim(true), "retry can claim again");
    }

    #[test]
    fn test_concurrent_claim_single_winner() {
        for _ in 0..50 {
            let tx = test_tx(RequestContext::background());
            let threads = 8;
            let barrier = Arc::new(Barrier::new(threads));
            let winners = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let tx = tx.clone();
                    let barrier = barrier.clone();
                    let winners = winners.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        if tx.try_claim(true) {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(winners.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_complete_requires_claim() {
        let tx = test_tx(RequestContext::background());
        assert!(!tx.complete(Ok(Hash::from_bytes(b"x"))));
        assert!(!tx.done().is_fired());

        assert!(tx.try_claim(true));
        let hash = Hash::from_bytes(b"x");
        assert!(tx.complete(Ok(hash)));
        assert!(tx.done().is_fired());
        assert_eq!(tx.hash(), hash);

        // Second completion is a no-op and leaves the first result.
        assert!(!tx.complete(Err(SendTxError::Rpc("late".into()))));
        assert_eq!(tx.hash(), hash);
        assert!(tx.err().is_none());
    }

    #[test]
    fn test_discard_only_when_unclaimed() {
        let tx = test_tx(RequestContext::background());
        assert!(tx.try_claim(true));
        assert!(!tx.discard(), "worker holds the claim");
        assert!(!tx.discarded().is_fired());

        assert!(tx.try_claim(false));
        assert!(tx.discard());
        assert!(tx.discarded().is_fired());
        assert!(!tx.discard(), "second discard is a no-op");
        assert_eq!(tx.err(), Some(SendTxError::Discarded));

        // A worker arriving late cannot claim or complete.
        assert!(!tx.try_claim(true));
        assert!(!tx.complete(Ok(Hash::from_bytes(b"late"))));
        assert!(!tx.done().is_fired());
    }

    #[test]
    fn test_finished_ticket_keeps_claim() {
        let tx = test_tx(RequestContext::background());
        assert!(tx.discard());

        // Releasing a discarded ticket must not reopen it to workers.
        assert!(!tx.try_claim(false));
        assert!(tx.in_progress());
        assert!(!tx.try_claim(true));
        assert!(!tx.complete(Ok(Hash::from_bytes(b"late"))));
        assert!(!tx.done().is_fired());

        let sent = test_tx(RequestContext::background());
        assert!(sent.try_claim(true));
        assert!(sent.complete(Ok(Hash::from_bytes(b"sent"))));
        assert!(!sent.try_claim(false));
        assert!(!sent.discard());
    }

    #[tokio::test]
    async fn test_second_completion_leaves_discard_waiter_blocked() {
        let tx = test_tx(RequestContext::background());
        assert!(tx.try_claim(true));
        let first = Hash::from_bytes(b"first");
        assert!(tx.complete(Ok(first)));
        assert!(!tx.complete(Err(SendTxError::Rpc("again".into()))));
        assert!(!tx.complete(Ok(Hash::from_bytes(b"again"))));

        let discarded = tx.discarded();
        let res = tokio::time::timeout(Duration::from_millis(50), discarded.wait()).await;
        assert!(res.is_err(), "discarded must stay unfired");
        assert_eq!(tx.hash(), first);
        assert!(tx.err().is_none());
        assert_eq!(tx.wait().await, TicketOutcome::Sent(first));
    }

    #[test]
    fn test_racing_completer_and_canceller_fire_one_signal() {
        for _ in 0..50 {
            let tx = test_tx(RequestContext::background());
            let barrier = Arc::new(Barrier::new(2));

            let worker = {
                let tx = tx.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    tx.try_claim(true) && tx.complete(Ok(Hash::from_bytes(b"sent")))
                })
            };
            let canceller = {
                let tx = tx.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    tx.discard()
                })
            };

            let completed = worker.join().unwrap();
            let discarded = canceller.join().unwrap();
            assert!(completed ^ discarded, "exactly one side must win");
            assert_eq!(tx.done().is_fired(), completed);
            assert_eq!(tx.discarded().is_fired(), discarded);
        }
    }

    #[tokio::test]
    async fn test_wait_sent() {
        let tx = test_tx(RequestContext::background());
        let worker = {
            let tx = tx.clone();
            tokio::spawn(async move {
                assert!(tx.try_claim(true));
                tx.complete(Ok(Hash::from_bytes(b"ok")))
            })
        };
        assert_eq!(tx.wait().await, TicketOutcome::Sent(Hash::from_bytes(b"ok")));
        assert!(worker.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_failed() {
        let tx = test_tx(RequestContext::background());
        assert!(tx.try_claim(true));
        tx.complete(Err(SendTxError::Rejected("nonce too low".into())));
        assert_eq!(
            tx.wait().await,
            TicketOutcome::Failed(SendTxError::Rejected("nonce too low".into()))
        );
    }

    #[tokio::test]
    async fn test_wait_discarded() {
        let tx = test_tx(RequestContext::background());
        let waiter = {
            let tx = tx.clone();
            tokio::spawn(async move { tx.wait().await })
        };
        tokio::task::yield_now().await;
        assert!(tx.discard());
        let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("discard must wake the waiter")
            .unwrap();
        assert_eq!(outcome, TicketOutcome::Discarded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_and_discards() {
        let tx = test_tx(RequestContext::with_timeout(Duration::from_secs(30)));
        assert_eq!(tx.wait().await, TicketOutcome::TimedOut);
        assert!(tx.discarded().is_fired());
        assert_eq!(tx.err(), Some(SendTxError::TimedOut));
    }

    #[tokio::test]
    async fn test_wait_cancelled() {
        let ctx = RequestContext::background();
        let tx = test_tx(ctx.clone());
        ctx.cancel();
        assert_eq!(tx.wait().await, TicketOutcome::Cancelled);
        assert!(tx.discarded().is_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_context_waits_for_claimed_worker() {
        let tx = test_tx(RequestContext::with_timeout(Duration::from_secs(1)));
        assert!(tx.try_claim(true));

        let worker = {
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                tx.complete(Ok(Hash::from_bytes(b"slow")))
            })
        };

        // Deadline passes while the worker holds the claim: the caller must
        // see the worker's result, never a discard.
        assert_eq!(tx.wait().await, TicketOutcome::Sent(Hash::from_bytes(b"slow")));
        assert!(!tx.discarded().is_fired());
        assert!(worker.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_context_discards_after_release() {
        let tx = test_tx(RequestContext::with_timeout(Duration::from_secs(1)));
        assert!(tx.try_claim(true));

        let worker = {
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                // Recoverable failure: hand the ticket back.
                tx.try_claim(false)
            })
        };

        assert_eq!(tx.wait().await, TicketOutcome::TimedOut);
        assert!(worker.await.unwrap());
        assert!(tx.discarded().is_fired());
    }

    #[test]
    fn test_outcome_into_result() {
        let hash = Hash::from_bytes(b"r");
        assert_eq!(TicketOutcome::Sent(hash).into_result(), Ok(hash));
        assert_eq!(
            TicketOutcome::TimedOut.into_result(),
            Err(SendTxError::TimedOut)
        );
        assert_eq!(
            TicketOutcome::Cancelled.into_result(),
            Err(SendTxError::Discarded)
        );
    }
}
