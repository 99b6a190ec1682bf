use crate::runtime::store::TransactionStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(30);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Running counters for the poll loop and the state sink.
#[derive(Default, Debug)]
pub struct Telemetry {
    ticks: AtomicU64,
    skipped_ticks: AtomicU64,
    checks_dispatched: AtomicU64,
    confirmations: AtomicU64,
    checkpoints: AtomicU64,
    removals: AtomicU64,
    cancellations: AtomicU64,
    exhausted: AtomicU64,
    sink_errors: AtomicU64,
}

impl Telemetry {
    pub fn record_tick(&self, dispatched: usize) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.checks_dispatched
            .fetch_add(dispatched as u64, Ordering::Relaxed);
    }

    pub fn record_skipped_tick(&self) {
        self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_confirmation(&self) {
        self.confirmations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancellations(&self, count: usize) {
        self.cancellations
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_error(&self) {
        self.sink_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            checks_dispatched: self.checks_dispatched.load(Ordering::Relaxed),
            confirmations: self.confirmations.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub checks_dispatched: u64,
    pub confirmations: u64,
    pub checkpoints: u64,
    pub removals: u64,
    pub cancellations: u64,
    pub exhausted: u64,
    pub sink_errors: u64,
}

/// Spawns a background task that periodically logs counters and the size of
/// the tracked set.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    store: Arc<TransactionStore>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "confirmwatch::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = telemetry.snapshot();
                    let (tracked, pending) = store.counts();

                    tracing::info!(
                        target: "confirmwatch::metrics",
                        tracked,
                        pending,
                        ticks = snapshot.ticks,
                        checks = snapshot.checks_dispatched,
                        confirmations = snapshot.confirmations,
                        checkpoints = snapshot.checkpoints,
                        removals = snapshot.removals,
                        cancellations = snapshot.cancellations,
                        exhausted = snapshot.exhausted,
                        sink_errors = snapshot.sink_errors,
                        "runtime metrics snapshot"
                    );
                }
            }
        }
    })
}
