//! Latest known block for the active chain and the task that keeps it fresh.

use crate::rpc::ChainProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Point-in-time view of the chain head.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadSnapshot {
    pub number: Option<u64>,
    /// Timestamp (seconds) of the most recent block whose header was loaded.
    pub timestamp: Option<u64>,
    /// Block that `timestamp` was read from. Lags `number` after a
    /// confirmed receipt fast-forwards the head.
    pub timestamp_block: Option<u64>,
}

impl HeadSnapshot {
    /// Whether `timestamp` belongs to the block at `number`.
    pub fn timestamp_is_current(&self) -> bool {
        self.number.is_some() && self.timestamp_block == self.number
    }
}

/// Monotonic watermark of the highest block observed on the active chain.
///
/// Both the block refresher and confirmed receipts feed it; concurrent
/// updates are resolved under the `watch` lock so the number never regresses.
#[derive(Debug)]
pub struct ChainHead {
    state: watch::Sender<HeadSnapshot>,
}

impl Default for ChainHead {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainHead {
    pub fn new() -> Self {
        let (state, _) = watch::channel(HeadSnapshot::default());
        Self { state }
    }

    /// Raises the head to `block_number`. Returns `true` if it moved.
    pub fn advance(&self, block_number: u64) -> bool {
        self.state.send_if_modified(|head| match head.number {
            Some(current) if current >= block_number => false,
            _ => {
                head.number = Some(block_number);
                true
            }
        })
    }

    /// Records the timestamp of `block_number`; headers older than the one
    /// already recorded are ignored.
    pub fn record_timestamp(&self, block_number: u64, timestamp: u64) {
        self.state.send_if_modified(|head| match head.timestamp_block {
            Some(current) if current >= block_number => false,
            _ => {
                head.timestamp = Some(timestamp);
                head.timestamp_block = Some(block_number);
                true
            }
        });
    }

    /// Forgets everything, used when the active chain changes.
    pub fn reset(&self) {
        self.state.send_replace(HeadSnapshot::default());
    }

    pub fn current(&self) -> Option<u64> {
        self.state.borrow().number
    }

    pub fn snapshot(&self) -> HeadSnapshot {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<HeadSnapshot> {
        self.state.subscribe()
    }
}

pub(crate) struct BlockRefresher;

impl BlockRefresher {
    /// Polls the provider for the latest block number until `shutdown` fires,
    /// loading the header timestamp whenever the head moves.
    pub(crate) fn spawn(
        provider: Arc<dyn ChainProvider>,
        head: Arc<ChainHead>,
        refresh_interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        break;
                    }
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = Self::refresh_once(provider.as_ref(), &head) => {}
                        }
                    }
                }
            }

            tracing::debug!("block refresher stopped");
        })
    }

    async fn refresh_once(provider: &dyn ChainProvider, head: &ChainHead) {
        let block_number = match provider.block_number().await {
            Ok(block_number) => block_number,
            Err(err) => {
                tracing::warn!(error = %err, "failed to refresh latest block number");
                return;
            }
        };

        let previous = head.current();
        if let Some(previous) = previous {
            if block_number < previous {
                tracing::debug!(
                    block_number,
                    previous,
                    "node reported an older block; keeping current head"
                );
                return;
            }
            if block_number == previous && head.snapshot().timestamp_block == Some(block_number) {
                return;
            }
        }

        // Load the timestamp before publishing the number so a tick triggered
        // by the new head sees a matching timestamp.
        match provider.block_timestamp(block_number).await {
            Ok(timestamp) => head.record_timestamp(block_number, timestamp),
            Err(err) => {
                tracing::warn!(error = %err, block_number, "failed to load block timestamp");
            }
        }
        if head.advance(block_number) {
            tracing::trace!(block_number, "chain head advanced");
        }
    }
}
