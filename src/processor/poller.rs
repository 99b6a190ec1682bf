//! One pass of the confirmation loop.
//!
//! Each [`tick`](PendingTransactionPoller::tick) tears down the lookups left
//! over from the previous pass, selects the transactions the scheduler says
//! are due, and starts one cancellable lookup per transaction. Results are
//! routed to the sink writer and the chain head; nothing else is mutated.

use super::fetcher::{FetchContext, FetchHandle, FetchOutcome, ReceiptFetcher};
use super::schedule::should_check;
use crate::rpc::ChainProvider;
use crate::runtime::clock::Clock;
use crate::runtime::head::ChainHead;
use crate::runtime::sink::{SinkCommand, SinkHandle};
use crate::runtime::telemetry::Telemetry;
use crate::transaction::{ChainId, PendingTransaction, TransactionConfirmation};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Inputs observed at the moment a tick starts.
#[derive(Clone, Default)]
pub struct TickContext {
    pub chain_id: Option<ChainId>,
    pub provider: Option<Arc<dyn ChainProvider>>,
    pub latest_block: Option<u64>,
    /// Timestamp (seconds) of `latest_block`, when known.
    pub block_timestamp: Option<u64>,
    pub account: Option<String>,
}

impl core::fmt::Debug for TickContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TickContext")
            .field("chain_id", &self.chain_id)
            .field("provider", &self.provider.is_some())
            .field("latest_block", &self.latest_block)
            .field("block_timestamp", &self.block_timestamp)
            .field("account", &self.account)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionUnmet {
    MissingChainId,
    MissingProvider,
    MissingBlockNumber,
    NoPendingTransactions,
}

impl core::fmt::Display for PreconditionUnmet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let reason = match self {
            PreconditionUnmet::MissingChainId => "no active chain",
            PreconditionUnmet::MissingProvider => "no provider",
            PreconditionUnmet::MissingBlockNumber => "latest block unknown",
            PreconditionUnmet::NoPendingTransactions => "no pending transactions",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickReport {
    Skipped(PreconditionUnmet),
    Dispatched {
        /// Lookups started by this tick.
        selected: usize,
        /// Lookups from the previous tick that were still running.
        cancelled: usize,
    },
}

/// State shared by every lookup started in one tick.
struct TickShared {
    sink: SinkHandle,
    head: Arc<ChainHead>,
    telemetry: Arc<Telemetry>,
    chain_id: ChainId,
    latest_block: u64,
}

pub struct PendingTransactionPoller {
    fetcher: ReceiptFetcher,
    sink: SinkHandle,
    head: Arc<ChainHead>,
    telemetry: Arc<Telemetry>,
    clock: Arc<dyn Clock>,
    in_flight: HashMap<String, FetchHandle<()>>,
    retired: Vec<JoinHandle<()>>,
}

impl PendingTransactionPoller {
    pub fn new(
        fetcher: ReceiptFetcher,
        sink: SinkHandle,
        head: Arc<ChainHead>,
        telemetry: Arc<Telemetry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fetcher,
            sink,
            head,
            telemetry,
            clock,
            in_flight: HashMap::new(),
            retired: Vec::new(),
        }
    }

    /// Runs one pass over `pending`. Must be called from within a tokio
    /// runtime.
    pub fn tick(&mut self, context: TickContext, pending: &[PendingTransaction]) -> TickReport {
        let cancelled = self.cancel_outstanding();

        let TickContext {
            chain_id,
            provider,
            latest_block,
            block_timestamp,
            account,
        } = context;

        let precondition = match (chain_id, provider, latest_block) {
            (None, _, _) => Err(PreconditionUnmet::MissingChainId),
            (_, None, _) => Err(PreconditionUnmet::MissingProvider),
            (_, _, None) => Err(PreconditionUnmet::MissingBlockNumber),
            (Some(chain_id), Some(provider), Some(latest_block)) => {
                Ok((chain_id, provider, latest_block))
            }
        };
        let (chain_id, provider, latest_block) = match precondition {
            Ok(inputs) => inputs,
            Err(reason) => return self.skip(reason),
        };

        let candidates: Vec<&PendingTransaction> = pending
            .iter()
            .filter(|tx| tx.chain_id == chain_id && tx.is_pending())
            .collect();
        if candidates.is_empty() {
            return self.skip(PreconditionUnmet::NoPendingTransactions);
        }

        let now = self.clock.now_millis();
        let context = FetchContext {
            chain_id,
            account,
            block_timestamp,
        };
        let shared = Arc::new(TickShared {
            sink: self.sink.clone(),
            head: self.head.clone(),
            telemetry: self.telemetry.clone(),
            chain_id,
            latest_block,
        });

        let mut selected = 0;
        for tx in candidates {
            // A hash listed twice in `pending` is looked up once.
            if self.in_flight.contains_key(&tx.hash) || !should_check(latest_block, tx, now) {
                continue;
            }
            let lookup = self
                .fetcher
                .fetch_receipt(provider.clone(), tx.clone(), context.clone());
            let token = lookup.token();
            let task = tokio::spawn(resolve(shared.clone(), tx.clone(), lookup));
            self.in_flight
                .insert(tx.hash.clone(), FetchHandle::new(token, task));
            selected += 1;
        }

        self.telemetry.record_tick(selected);
        tracing::debug!(
            chain_id,
            latest_block,
            selected,
            cancelled,
            "poll tick dispatched"
        );
        TickReport::Dispatched {
            selected,
            cancelled,
        }
    }

    /// Cancels every lookup started by the previous tick and returns how many
    /// were still running.
    pub fn cancel_outstanding(&mut self) -> usize {
        self.retired.retain(|task| !task.is_finished());

        let mut cancelled = 0;
        for (_, handle) in self.in_flight.drain() {
            if !handle.is_finished() {
                cancelled += 1;
            }
            handle.cancel();
            self.retired.push(handle.into_task());
        }

        if cancelled > 0 {
            self.telemetry.record_cancellations(cancelled);
            tracing::trace!(cancelled, "cancelled outstanding receipt lookups");
        }
        cancelled
    }

    /// Lookups started by the last tick that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Cancels outstanding work and waits for every lookup task to exit.
    pub async fn shutdown(&mut self) {
        self.cancel_outstanding();
        for task in self.retired.drain(..) {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "receipt lookup task failed during shutdown");
            }
        }
    }

    fn skip(&self, reason: PreconditionUnmet) -> TickReport {
        self.telemetry.record_skipped_tick();
        tracing::trace!(%reason, "poll tick skipped");
        TickReport::Skipped(reason)
    }
}

async fn resolve(shared: Arc<TickShared>, tx: PendingTransaction, lookup: FetchHandle) {
    let token = lookup.token();
    let outcome = lookup.outcome().await;

    // A lookup superseded after it resolved must stay silent.
    if token.is_cancelled() {
        return;
    }

    let chain_id = shared.chain_id;
    match outcome {
        FetchOutcome::Confirmed(receipt) => {
            if shared.head.advance(receipt.block_number) {
                tracing::debug!(
                    block_number = receipt.block_number,
                    "chain head fast-forwarded from receipt"
                );
            }
            shared
                .sink
                .send(SinkCommand::Confirm(TransactionConfirmation {
                    transaction: tx,
                    receipt,
                    chain_id,
                }))
                .await;
        }
        FetchOutcome::Exhausted { attempts } => {
            shared.telemetry.record_exhausted();
            tracing::trace!(hash = %tx.hash, chain_id, attempts, "receipt not found; checkpointing");
            shared
                .sink
                .send(SinkCommand::Checkpoint {
                    chain_id,
                    hash: tx.hash,
                    block_number: shared.latest_block,
                })
                .await;
        }
        FetchOutcome::Cancelled => {}
    }
}
