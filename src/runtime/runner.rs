use crate::processor::lifecycle::{ChainContext, LifecycleHandles, LifecycleSpawnParams};
use crate::runtime::clock::{Clock, SystemClock};
use crate::runtime::config::WatcherConfig;
use crate::runtime::head::ChainHead;
use crate::runtime::store::TransactionStore;
use crate::runtime::telemetry::Telemetry;
use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Keeps the pending transactions of the connected chain moving toward a
/// terminal state and handles OS signals for graceful shutdowns.
///
/// The active chain is read from a `watch` channel; publishing a new
/// [`ChainContext`] (or `None`) cancels all in-flight lookups for the previous
/// one before any work starts on the next.
pub struct TransactionWatcher {
    config: WatcherConfig,
    store: Arc<TransactionStore>,
    head: Arc<ChainHead>,
    telemetry: Arc<Telemetry>,
    clock: Arc<dyn Clock>,
    context: watch::Receiver<Option<ChainContext>>,
    shutdown: CancellationToken,
    handles: Option<LifecycleHandles>,
}

impl TransactionWatcher {
    pub fn new(
        config: WatcherConfig,
        store: Arc<TransactionStore>,
        context: watch::Receiver<Option<ChainContext>>,
    ) -> Self {
        Self {
            config,
            store,
            head: Arc::new(ChainHead::new()),
            telemetry: Arc::new(Telemetry::default()),
            clock: Arc::new(SystemClock),
            context,
            shutdown: CancellationToken::new(),
            handles: None,
        }
    }

    /// Replaces the wall clock used for scheduling and expiry. Takes effect on
    /// the next [`start`](Self::start).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn store(&self) -> Arc<TransactionStore> {
        self.store.clone()
    }

    pub fn head(&self) -> Arc<ChainHead> {
        self.head.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handles.is_some()
    }

    /// Spawns the watch loop, the sink writer and the metrics reporter.
    pub async fn start(&mut self) -> Result<()> {
        if self.handles.is_some() {
            return Ok(());
        }

        self.config.validate()?;
        let handles = LifecycleHandles::spawn(LifecycleSpawnParams {
            shutdown_root: &self.shutdown,
            config: &self.config,
            store: self.store.clone(),
            head: self.head.clone(),
            telemetry: self.telemetry.clone(),
            clock: self.clock.clone(),
            context: self.context.clone(),
        });
        tracing::info!(
            block_refresh_ms = self.config.block_refresh_interval().as_millis() as u64,
            max_pending_age_secs = self.config.max_pending_age().as_secs(),
            "transaction watcher started"
        );
        self.handles = Some(handles);
        Ok(())
    }

    /// Cancels all in-flight work and waits for the background tasks to exit.
    /// Commands already queued for the store are applied before this returns.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(handles) = self.handles.take() else {
            return Ok(());
        };

        handles.run_token.cancel();
        handles.shutdown().await;
        self.shutdown.cancel();
        self.reinitialize_shutdown_token();
        tracing::info!("transaction watcher stopped");
        Ok(())
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is cancelled elsewhere.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!("watcher started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down watcher");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("watcher shutdown token cancelled");
            }
        }

        self.stop().await
    }

    fn reinitialize_shutdown_token(&mut self) {
        self.shutdown = CancellationToken::new();
    }
}
