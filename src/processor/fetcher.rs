//! Bounded, cancellable receipt lookups.
//!
//! A lookup that finds no receipt is retried according to the chain's
//! [`RetryOptions`](super::retry_policy::RetryOptions). While the transaction
//! remains unmined the expiry policy is consulted, and an expired transaction
//! is handed to the sink for removal regardless of how the lookup ends.

use super::backoff::{retry_with_backoff, RetryBackoff, RetryOutcome};
use super::expiry::is_expired;
use super::retry_policy::RetryPolicy;
use crate::rpc::ChainProvider;
use crate::runtime::clock::Clock;
use crate::runtime::sink::{SinkCommand, SinkHandle};
use crate::transaction::{ChainId, PendingTransaction, Receipt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Chain-level facts a lookup needs besides the transaction itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchContext {
    pub chain_id: ChainId,
    /// Connected account. Expired transactions are only removed when set.
    pub account: Option<String>,
    /// Timestamp (seconds) of the latest known block, for deadline checks.
    pub block_timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Confirmed(Receipt),
    /// Every attempt came back without a receipt.
    Exhausted { attempts: usize },
    /// The lookup was superseded before it resolved.
    Cancelled,
}

/// Cancel handle plus the task running a lookup.
#[derive(Debug)]
pub struct FetchHandle<T = FetchOutcome> {
    token: CancellationToken,
    task: JoinHandle<T>,
}

impl<T> FetchHandle<T> {
    pub(crate) fn new(token: CancellationToken, task: JoinHandle<T>) -> Self {
        Self { token, task }
    }

    /// Stops further attempts and suppresses the result. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub(crate) fn into_task(self) -> JoinHandle<T> {
        self.task
    }
}

impl FetchHandle<FetchOutcome> {
    /// Waits for the lookup to finish. A task that died without reporting is
    /// treated as cancelled.
    pub async fn outcome(self) -> FetchOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(error = %err, "receipt lookup task failed");
                FetchOutcome::Cancelled
            }
        }
    }
}

#[derive(Clone)]
pub struct ReceiptFetcher {
    retry_policy: Arc<RetryPolicy>,
    sink: SinkHandle,
    clock: Arc<dyn Clock>,
    max_pending_age: Duration,
}

impl ReceiptFetcher {
    pub fn new(
        retry_policy: Arc<RetryPolicy>,
        sink: SinkHandle,
        clock: Arc<dyn Clock>,
        max_pending_age: Duration,
    ) -> Self {
        Self {
            retry_policy,
            sink,
            clock,
            max_pending_age,
        }
    }

    /// Starts a lookup on its own task and returns its handle.
    pub fn fetch_receipt(
        &self,
        provider: Arc<dyn ChainProvider>,
        tx: PendingTransaction,
        context: FetchContext,
    ) -> FetchHandle {
        let token = CancellationToken::new();
        let fetcher = self.clone();
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            fetcher
                .fetch(provider.as_ref(), &tx, &context, &task_token)
                .await
        });
        FetchHandle::new(token, task)
    }

    /// Runs a lookup to completion on the current task.
    ///
    /// A removal decided during the lookup is queued after the retry loop
    /// ends, so cancelling the lookup never drops it.
    pub async fn fetch(
        &self,
        provider: &dyn ChainProvider,
        tx: &PendingTransaction,
        context: &FetchContext,
        token: &CancellationToken,
    ) -> FetchOutcome {
        let options = self.retry_policy.options_for(context.chain_id);
        let expired = AtomicBool::new(false);
        let expired_ref = &expired;
        let hash = tx.hash.as_str();
        let chain_id = context.chain_id;

        let outcome = retry_with_backoff(
            RetryBackoff::new(options.min_wait, options.max_wait)
                .with_max_attempts(options.max_attempts)
                .with_cancellation(token),
            move |attempt| async move {
                self.attempt(provider, tx, context, attempt, expired_ref)
                    .await
            },
            move |attempt, backoff| {
                tracing::debug!(
                    hash,
                    chain_id,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "receipt not available yet; retrying"
                );
            },
        )
        .await;

        if expired.load(Ordering::SeqCst) {
            self.sink
                .send(SinkCommand::Remove {
                    hash: tx.hash.clone(),
                })
                .await;
        }

        match outcome {
            RetryOutcome::Completed(receipt) => FetchOutcome::Confirmed(receipt),
            RetryOutcome::Exhausted { attempts } => {
                tracing::debug!(hash, chain_id, attempts, "receipt lookup exhausted retries");
                FetchOutcome::Exhausted { attempts }
            }
            RetryOutcome::Cancelled => {
                tracing::trace!(hash, chain_id, "receipt lookup cancelled");
                FetchOutcome::Cancelled
            }
        }
    }

    async fn attempt(
        &self,
        provider: &dyn ChainProvider,
        tx: &PendingTransaction,
        context: &FetchContext,
        attempt: usize,
        expired: &AtomicBool,
    ) -> Option<Receipt> {
        match provider.transaction_receipt(&tx.hash).await {
            Ok(Some(receipt)) => Some(receipt),
            Ok(None) => {
                self.check_expiry(tx, context, expired);
                None
            }
            Err(err) => {
                tracing::warn!(
                    hash = %tx.hash,
                    chain_id = context.chain_id,
                    attempt,
                    error = %err,
                    "receipt lookup failed"
                );
                None
            }
        }
    }

    /// Flags the lookup for removal once the transaction is found expired.
    fn check_expiry(&self, tx: &PendingTransaction, context: &FetchContext, expired: &AtomicBool) {
        if context.account.is_none() || expired.load(Ordering::SeqCst) {
            return;
        }
        let now = self.clock.now_millis();
        if !is_expired(tx, context.block_timestamp, now, self.max_pending_age) {
            return;
        }
        if expired.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!(
            hash = %tx.hash,
            chain_id = context.chain_id,
            deadline = ?tx.deadline,
            block_timestamp = ?context.block_timestamp,
            "transaction expired; requesting removal"
        );
    }
}
