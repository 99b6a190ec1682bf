use crate::transaction::Receipt;
use anyhow::Result;
use futures::future::BoxFuture;

/// Node capabilities the tracker relies on.
///
/// `transaction_receipt` resolves to `Ok(None)` while the transaction is not
/// mined yet; any other failure is reported as an error and retried by the
/// caller.
pub trait ChainProvider: Send + Sync {
    fn transaction_receipt<'a>(&'a self, hash: &'a str) -> BoxFuture<'a, Result<Option<Receipt>>>;

    fn block_number(&self) -> BoxFuture<'_, Result<u64>>;

    /// Timestamp (seconds since the epoch) of the given block.
    fn block_timestamp(&self, block_number: u64) -> BoxFuture<'_, Result<u64>>;
}
