//! Lifecycle orchestration for `TransactionWatcher`.

use super::fetcher::ReceiptFetcher;
use super::poller::{PendingTransactionPoller, TickContext, TickReport};
use crate::rpc::ChainProvider;
use crate::runtime::clock::Clock;
use crate::runtime::config::WatcherConfig;
use crate::runtime::head::{BlockRefresher, ChainHead, HeadSnapshot};
use crate::runtime::sink::{SinkWriter, StateSink};
use crate::runtime::store::TransactionStore;
use crate::runtime::telemetry::{self, Telemetry};
use crate::transaction::ChainId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The chain the application is currently connected to.
#[derive(Clone)]
pub struct ChainContext {
    pub chain_id: ChainId,
    /// Connected account, if any. Expired transactions are only removed while
    /// an account is connected.
    pub account: Option<String>,
    pub provider: Arc<dyn ChainProvider>,
}

impl core::fmt::Debug for ChainContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChainContext")
            .field("chain_id", &self.chain_id)
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

pub(crate) struct LifecycleHandles {
    pub run_token: CancellationToken,
    loop_handle: Option<JoinHandle<()>>,
    writer_handle: Option<JoinHandle<()>>,
    metrics_handle: Option<JoinHandle<()>>,
}

pub(crate) struct LifecycleSpawnParams<'a> {
    pub shutdown_root: &'a CancellationToken,
    pub config: &'a WatcherConfig,
    pub store: Arc<TransactionStore>,
    pub head: Arc<ChainHead>,
    pub telemetry: Arc<Telemetry>,
    pub clock: Arc<dyn Clock>,
    pub context: watch::Receiver<Option<ChainContext>>,
}

impl LifecycleHandles {
    pub(crate) fn spawn(params: LifecycleSpawnParams<'_>) -> Self {
        let LifecycleSpawnParams {
            shutdown_root,
            config,
            store,
            head,
            telemetry,
            clock,
            context,
        } = params;

        let run_token = shutdown_root.child_token();
        let sink: Arc<dyn StateSink> = store.clone();
        let (sink_handle, writer_handle) =
            SinkWriter::spawn(sink, config.sink_queue_capacity(), telemetry.clone());
        let metrics_handle = telemetry::spawn_metrics_reporter(
            telemetry.clone(),
            store.clone(),
            run_token.clone(),
            config.metrics_interval(),
        );

        let fetcher = ReceiptFetcher::new(
            Arc::new(config.retry_policy().clone()),
            sink_handle.clone(),
            clock.clone(),
            config.max_pending_age(),
        );
        let poller = PendingTransactionPoller::new(
            fetcher,
            sink_handle,
            head.clone(),
            telemetry,
            clock,
        );
        let watch_loop = WatchLoop {
            poller,
            store,
            head,
            context,
            refresh_interval: config.block_refresh_interval(),
            shutdown: run_token.clone(),
            active: None,
        };
        let loop_handle = tokio::spawn(watch_loop.run());

        Self {
            run_token,
            loop_handle: Some(loop_handle),
            writer_handle: Some(writer_handle),
            metrics_handle: Some(metrics_handle),
        }
    }

    /// Waits for every task to exit. The watch loop goes first: once it has
    /// drained its lookups the last sink handle is dropped and the writer
    /// flushes what is still queued.
    pub(crate) async fn shutdown(mut self) {
        if let Some(handle) = self.loop_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "watch loop task panicked");
            }
        }

        if let Some(handle) = self.writer_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "state sink writer task panicked");
            }
        }

        if let Some(handle) = self.metrics_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
        }
    }
}

/// Chain the loop is currently polling, with its block refresher.
struct ActiveChain {
    context: ChainContext,
    refresher_token: CancellationToken,
    refresher: JoinHandle<()>,
}

/// Why a tick is being run.
#[derive(Debug, Clone, Copy)]
enum Trigger {
    ChainSwitch,
    HeadAdvanced,
    TimestampLoaded,
    PendingSetChanged,
}

struct WatchLoop {
    poller: PendingTransactionPoller,
    store: Arc<TransactionStore>,
    head: Arc<ChainHead>,
    context: watch::Receiver<Option<ChainContext>>,
    refresh_interval: Duration,
    shutdown: CancellationToken,
    active: Option<ActiveChain>,
}

impl WatchLoop {
    async fn run(mut self) {
        let mut head_rx = self.head.subscribe();
        let mut store_rx = self.store.subscribe();
        let mut context_open = true;
        let mut ticked_head: Option<u64>;
        let mut ticked_with_timestamp: bool;
        let mut ticked_pending: Vec<String>;

        let initial = self.context.borrow_and_update().clone();
        self.switch_chain(initial).await;
        let mut trigger = Trigger::ChainSwitch;

        loop {
            let chain_id = self.active.as_ref().map(|active| active.context.chain_id);
            let pending = chain_id
                .map(|chain_id| self.store.pending_for_chain(chain_id))
                .unwrap_or_default();
            let snapshot = self.head.snapshot();

            let report = self.poller.tick(self.tick_context(snapshot), &pending);
            ticked_head = snapshot.number;
            ticked_with_timestamp = snapshot.timestamp_is_current();
            ticked_pending = pending.into_iter().map(|tx| tx.hash).collect();
            if let TickReport::Dispatched { selected, cancelled } = report {
                tracing::trace!(?trigger, selected, cancelled, "tick complete");
            }

            trigger = loop {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => {
                        self.stop().await;
                        return;
                    }
                    changed = self.context.changed(), if context_open => {
                        if changed.is_err() {
                            tracing::debug!("chain context sender dropped; keeping current chain");
                            context_open = false;
                            continue;
                        }
                        let next = self.context.borrow_and_update().clone();
                        self.switch_chain(next).await;
                        break Trigger::ChainSwitch;
                    }
                    changed = head_rx.changed() => {
                        if changed.is_err() {
                            continue;
                        }
                        let head = *head_rx.borrow_and_update();
                        if head.number.is_some() && head.number != ticked_head {
                            break Trigger::HeadAdvanced;
                        }
                        // The last tick ran on a fast-forwarded head whose
                        // header was still loading.
                        if !ticked_with_timestamp && head.timestamp_is_current() {
                            break Trigger::TimestampLoaded;
                        }
                    }
                    changed = store_rx.changed() => {
                        if changed.is_err() {
                            continue;
                        }
                        store_rx.borrow_and_update();
                        let Some(chain_id) = self.active.as_ref().map(|a| a.context.chain_id) else {
                            continue;
                        };
                        let current: Vec<String> = self
                            .store
                            .pending_for_chain(chain_id)
                            .into_iter()
                            .map(|tx| tx.hash)
                            .collect();
                        if current != ticked_pending {
                            break Trigger::PendingSetChanged;
                        }
                    }
                }
            };
        }
    }

    fn tick_context(&self, head: HeadSnapshot) -> TickContext {
        match &self.active {
            Some(active) => TickContext {
                chain_id: Some(active.context.chain_id),
                provider: Some(active.context.provider.clone()),
                latest_block: head.number,
                block_timestamp: head.timestamp,
                account: active.context.account.clone(),
            },
            None => TickContext::default(),
        }
    }

    /// Tears down everything tied to the previous chain before adopting `next`.
    async fn switch_chain(&mut self, next: Option<ChainContext>) {
        let cancelled = self.poller.cancel_outstanding();
        if let Some(previous) = self.active.take() {
            tracing::info!(
                from = previous.context.chain_id,
                to = ?next.as_ref().map(|context| context.chain_id),
                cancelled,
                "switching chain"
            );
            Self::stop_refresher(previous).await;
        }
        self.head.reset();

        if let Some(context) = next {
            let refresher_token = self.shutdown.child_token();
            let refresher = BlockRefresher::spawn(
                context.provider.clone(),
                self.head.clone(),
                self.refresh_interval,
                refresher_token.clone(),
            );
            tracing::info!(
                chain_id = context.chain_id,
                account = ?context.account,
                "watching chain"
            );
            self.active = Some(ActiveChain {
                context,
                refresher_token,
                refresher,
            });
        }
    }

    async fn stop(&mut self) {
        self.poller.shutdown().await;
        if let Some(active) = self.active.take() {
            Self::stop_refresher(active).await;
        }
        tracing::debug!("watch loop stopped");
    }

    async fn stop_refresher(active: ActiveChain) {
        active.refresher_token.cancel();
        if let Err(err) = active.refresher.await {
            tracing::warn!(error = %err, "block refresher task panicked");
        }
    }
}
