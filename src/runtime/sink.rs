//! Mutation boundary between the poller and application state.
//!
//! Fetch tasks run concurrently but never touch state directly: they enqueue a
//! [`SinkCommand`] and a single [`SinkWriter`] task applies commands one at a
//! time through the [`StateSink`] implementation.

use crate::runtime::telemetry::Telemetry;
use crate::transaction::{ChainId, TransactionConfirmation};
use anyhow::Error as AnyError;
use core::future::Future;
use core::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

/// Which mutation a [`SinkError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkCommandKind {
    Confirm,
    Checkpoint,
    Remove,
}

/// Error surfaced by a state sink. Logged and counted, never fatal to polling.
#[derive(Debug)]
pub struct SinkError {
    kind: SinkCommandKind,
    source: AnyError,
}

impl SinkError {
    pub fn new(kind: SinkCommandKind, source: AnyError) -> Self {
        Self { kind, source }
    }

    pub fn kind(&self) -> SinkCommandKind {
        self.kind
    }
}

impl core::fmt::Display for SinkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?} sink error: {}", self.kind, self.source)
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Receives the mutations produced by the poller.
pub trait StateSink: Send + Sync + 'static {
    /// Marks the transaction terminal and stores its receipt.
    fn confirm<'a>(&'a self, confirmation: TransactionConfirmation) -> SinkFuture<'a>;

    /// Records the block at which the transaction was last polled.
    fn checkpoint<'a>(&'a self, chain_id: ChainId, hash: &'a str, block_number: u64)
        -> SinkFuture<'a>;

    /// Drops an expired transaction.
    fn remove<'a>(&'a self, hash: &'a str) -> SinkFuture<'a>;
}

/// A single state mutation queued for the writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCommand {
    Confirm(TransactionConfirmation),
    Checkpoint {
        chain_id: ChainId,
        hash: String,
        block_number: u64,
    },
    Remove {
        hash: String,
    },
}

impl SinkCommand {
    pub fn kind(&self) -> SinkCommandKind {
        match self {
            SinkCommand::Confirm(_) => SinkCommandKind::Confirm,
            SinkCommand::Checkpoint { .. } => SinkCommandKind::Checkpoint,
            SinkCommand::Remove { .. } => SinkCommandKind::Remove,
        }
    }

    pub fn hash(&self) -> &str {
        match self {
            SinkCommand::Confirm(confirmation) => &confirmation.transaction.hash,
            SinkCommand::Checkpoint { hash, .. } | SinkCommand::Remove { hash } => hash,
        }
    }
}

/// Cloneable producer side of the writer queue.
#[derive(Debug, Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<SinkCommand>,
}

impl SinkHandle {
    /// Creates a handle together with the receiving end of its queue, for
    /// callers that consume commands themselves instead of through a
    /// [`SinkWriter`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SinkCommand>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queues a command. Returns `false` if the writer has already stopped.
    pub async fn send(&self, command: SinkCommand) -> bool {
        let kind = command.kind();
        match self.tx.send(command).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    kind = ?kind,
                    hash = err.0.hash(),
                    "state sink writer stopped; dropping command"
                );
                false
            }
        }
    }
}

pub struct SinkWriter;

impl SinkWriter {
    /// Spawns the writer task. It runs until every [`SinkHandle`] is dropped,
    /// applying whatever is still queued before exiting.
    pub fn spawn(
        sink: Arc<dyn StateSink>,
        capacity: usize,
        telemetry: Arc<Telemetry>,
    ) -> (SinkHandle, JoinHandle<()>) {
        let (handle, mut rx) = SinkHandle::channel(capacity);

        let task = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                let kind = command.kind();
                if let Err(err) = Self::apply(sink.as_ref(), command).await {
                    telemetry.record_sink_error();
                    tracing::warn!(kind = ?kind, error = %err, "state sink rejected command");
                    continue;
                }
                match kind {
                    SinkCommandKind::Confirm => telemetry.record_confirmation(),
                    SinkCommandKind::Checkpoint => telemetry.record_checkpoint(),
                    SinkCommandKind::Remove => telemetry.record_removal(),
                }
            }

            tracing::debug!("state sink writer stopped");
        });

        (handle, task)
    }

    async fn apply(sink: &dyn StateSink, command: SinkCommand) -> Result<(), SinkError> {
        match command {
            SinkCommand::Confirm(confirmation) => sink.confirm(confirmation).await,
            SinkCommand::Checkpoint {
                chain_id,
                hash,
                block_number,
            } => sink.checkpoint(chain_id, &hash, block_number).await,
            SinkCommand::Remove { hash } => sink.remove(&hash).await,
        }
    }
}
