//! Watches a handful of transaction hashes until they are mined.
//!
//! ```text
//! CONFIRMWATCH_RPC_URL=https://mainnet.mode.network \
//! CONFIRMWATCH_CHAIN_ID=34443 \
//! CONFIRMWATCH_TX_HASHES=0xabc...,0xdef... \
//! cargo run --example watch_receipts
//! ```
//!
//! Any `CONFIRMWATCH_*` knob understood by `WatcherConfig::from_env` applies.

use anyhow::{Context, Result};
use confirmwatch::{
    init_tracing, AsyncRpcClient, ChainContext, Clock, PendingTransaction, SystemClock,
    TransactionStore, TransactionWatcher, WatcherConfig,
};
use std::collections::HashSet;
use std::env;
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let rpc_url = env::var("CONFIRMWATCH_RPC_URL").context("CONFIRMWATCH_RPC_URL is required")?;
    let chain_id: u64 = env::var("CONFIRMWATCH_CHAIN_ID")
        .context("CONFIRMWATCH_CHAIN_ID is required")?
        .parse()
        .context("CONFIRMWATCH_CHAIN_ID must be an integer")?;
    let hashes = env::var("CONFIRMWATCH_TX_HASHES").context("CONFIRMWATCH_TX_HASHES is required")?;
    let account = env::var("CONFIRMWATCH_ACCOUNT").ok();

    let config = WatcherConfig::from_env()?;
    let client = AsyncRpcClient::with_options(&rpc_url, config.rpc_client_options())?;

    let store = Arc::new(TransactionStore::new());
    let now = SystemClock.now_millis();
    for hash in hashes.split(',').map(str::trim).filter(|hash| !hash.is_empty()) {
        store.insert(PendingTransaction::new(hash, chain_id, now));
    }

    let (_context_tx, context_rx) = watch::channel(Some(ChainContext {
        chain_id,
        account,
        provider: Arc::new(client.clone()),
    }));
    let mut watcher = TransactionWatcher::new(config, store.clone(), context_rx);
    let shutdown = watcher.cancellation_token();

    let mut changes = store.subscribe();
    let reporter = tokio::spawn(async move {
        let mut reported = HashSet::new();
        while changes.changed().await.is_ok() {
            for tx in store.all() {
                let Some(receipt) = &tx.receipt else {
                    continue;
                };
                if reported.insert(tx.hash.clone()) {
                    tracing::info!(
                        hash = %tx.hash,
                        block_number = receipt.block_number,
                        succeeded = receipt.succeeded(),
                        "confirmed"
                    );
                }
            }
            if store.pending_for_chain(chain_id).is_empty() {
                tracing::info!("every transaction reached a terminal state");
                shutdown.cancel();
                break;
            }
        }
    });

    watcher.run_until_ctrl_c().await?;
    reporter.abort();

    let metrics = client.metrics();
    tracing::info!(
        requests = metrics.total_requests,
        errors = metrics.total_errors,
        average_latency_ms = metrics.average_latency_ms,
        "rpc summary"
    );
    Ok(())
}
