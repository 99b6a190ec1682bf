//! In-memory multichain transaction store implementing [`StateSink`].
//!
//! Every mutation bumps a revision published on a `watch` channel so the
//! watcher can re-run the poll loop when the pending set changes.

use crate::runtime::sink::{SinkFuture, StateSink};
use crate::transaction::{ChainId, PendingTransaction, TransactionConfirmation};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::watch;

#[derive(Debug)]
pub struct TransactionStore {
    transactions: RwLock<HashMap<String, PendingTransaction>>,
    revision: watch::Sender<u64>,
}

impl Default for TransactionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            transactions: RwLock::new(HashMap::new()),
            revision,
        }
    }

    /// Starts tracking a transaction. An existing entry with the same hash is
    /// replaced.
    pub fn insert(&self, tx: PendingTransaction) {
        tracing::debug!(hash = %tx.hash, chain_id = tx.chain_id, "tracking transaction");
        self.write().insert(tx.hash.clone(), tx);
        self.bump();
    }

    pub fn get(&self, hash: &str) -> Option<PendingTransaction> {
        self.read().get(hash).cloned()
    }

    /// Unconfirmed transactions submitted on `chain_id`, ordered by age.
    pub fn pending_for_chain(&self, chain_id: ChainId) -> Vec<PendingTransaction> {
        let mut pending: Vec<_> = self
            .read()
            .values()
            .filter(|tx| tx.chain_id == chain_id && tx.is_pending())
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.added_time
                .cmp(&b.added_time)
                .then_with(|| a.hash.cmp(&b.hash))
        });
        pending
    }

    pub fn all(&self) -> Vec<PendingTransaction> {
        self.read().values().cloned().collect()
    }

    /// `(tracked, pending)` counts across every chain.
    pub fn counts(&self) -> (usize, usize) {
        let guard = self.read();
        let pending = guard.values().filter(|tx| tx.is_pending()).count();
        (guard.len(), pending)
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn apply_confirmation(&self, confirmation: TransactionConfirmation) {
        let TransactionConfirmation {
            transaction,
            receipt,
            chain_id,
        } = confirmation;
        {
            let mut guard = self.write();
            let Some(entry) = guard.get_mut(&transaction.hash) else {
                tracing::debug!(
                    hash = %transaction.hash,
                    chain_id,
                    "confirmation for untracked transaction ignored"
                );
                return;
            };
            if entry.chain_id != chain_id {
                tracing::debug!(
                    hash = %transaction.hash,
                    chain_id,
                    tracked_chain_id = entry.chain_id,
                    "confirmation from another chain ignored"
                );
                return;
            }
            if entry.receipt.is_some() {
                return;
            }
            tracing::info!(
                hash = %transaction.hash,
                chain_id,
                block_number = receipt.block_number,
                status = ?receipt.status,
                "transaction confirmed"
            );
            entry.receipt = Some(receipt);
        }
        self.bump();
    }

    fn apply_checkpoint(&self, chain_id: ChainId, hash: &str, block_number: u64) {
        {
            let mut guard = self.write();
            let Some(entry) = guard.get_mut(hash) else {
                return;
            };
            if entry.chain_id != chain_id || entry.receipt.is_some() {
                return;
            }
            if entry
                .last_checked_block_number
                .is_some_and(|last| last >= block_number)
            {
                return;
            }
            entry.last_checked_block_number = Some(block_number);
        }
        self.bump();
    }

    fn apply_removal(&self, hash: &str) {
        let removed = self.write().remove(hash);
        if let Some(tx) = removed {
            tracing::info!(hash, chain_id = tx.chain_id, "expired transaction removed");
            self.bump();
        }
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision = revision.wrapping_add(1));
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, PendingTransaction>> {
        self.transactions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, PendingTransaction>> {
        self.transactions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateSink for TransactionStore {
    fn confirm<'a>(&'a self, confirmation: TransactionConfirmation) -> SinkFuture<'a> {
        Box::pin(async move {
            self.apply_confirmation(confirmation);
            Ok(())
        })
    }

    fn checkpoint<'a>(
        &'a self,
        chain_id: ChainId,
        hash: &'a str,
        block_number: u64,
    ) -> SinkFuture<'a> {
        Box::pin(async move {
            self.apply_checkpoint(chain_id, hash, block_number);
            Ok(())
        })
    }

    fn remove<'a>(&'a self, hash: &'a str) -> SinkFuture<'a> {
        Box::pin(async move {
            self.apply_removal(hash);
            Ok(())
        })
    }
}
