use crate::transaction::PendingTransaction;
use std::time::Duration;

/// Age after which a transaction without a deadline is presumed dropped.
pub const DEFAULT_MAX_PENDING_AGE: Duration = Duration::from_secs(6 * 60 * 60);

/// Whether an unconfirmed transaction should be removed.
///
/// With a deadline the decision needs the latest block timestamp (seconds);
/// when it is not known yet the transaction is kept. Without a deadline the
/// transaction expires once it has been pending longer than `max_age`.
pub fn is_expired(
    tx: &PendingTransaction,
    block_timestamp: Option<u64>,
    now_ms: u64,
    max_age: Duration,
) -> bool {
    match tx.deadline {
        Some(deadline) => block_timestamp.is_some_and(|timestamp| deadline < timestamp),
        None => {
            let max_age_ms = max_age.as_millis().min(u128::from(u64::MAX)) as u64;
            now_ms.saturating_sub(tx.added_time) > max_age_ms
        }
    }
}
