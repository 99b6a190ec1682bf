use std::{
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use anyhow::{bail, Result};
use confirmwatch::{PendingTransaction, TransactionStore};
use once_cell::sync::Lazy;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

pub async fn wait_for_tx<F>(
    store: &Arc<TransactionStore>,
    hash: &str,
    timeout: Duration,
    mut predicate: F,
) -> Result<()>
where
    F: FnMut(Option<&PendingTransaction>) -> bool,
{
    let start = Instant::now();
    loop {
        let current = store.get(hash);
        if predicate(current.as_ref()) {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("transaction {hash} did not reach the expected state within {timeout:?} (last: {current:?})");
        }
        sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_for_receipt(
    store: &Arc<TransactionStore>,
    hash: &str,
    timeout: Duration,
) -> Result<()> {
    wait_for_tx(store, hash, timeout, |tx| {
        tx.is_some_and(|tx| tx.receipt.is_some())
    })
    .await
}

pub async fn wait_for_checkpoint(
    store: &Arc<TransactionStore>,
    hash: &str,
    block_number: u64,
    timeout: Duration,
) -> Result<()> {
    wait_for_tx(store, hash, timeout, |tx| {
        tx.and_then(|tx| tx.last_checked_block_number)
            .is_some_and(|checked| checked >= block_number)
    })
    .await
}

pub async fn wait_for_removal(
    store: &Arc<TransactionStore>,
    hash: &str,
    timeout: Duration,
) -> Result<()> {
    wait_for_tx(store, hash, timeout, |tx| tx.is_none()).await
}
