//! Block cadence for receipt checks. Young transactions are checked on every
//! block; the longer a transaction stays pending the more blocks are skipped
//! between checks.

use crate::transaction::PendingTransaction;

const MILLIS_PER_MINUTE: u64 = 60_000;

/// Pending longer than this many minutes: check every 10th block.
pub const SLOW_TIER_MINUTES: u64 = 60;
/// Pending longer than this many minutes: check every 3rd block.
pub const MEDIUM_TIER_MINUTES: u64 = 5;

/// Decides whether `tx` should be checked now that `current_block` is the
/// latest block. `now_ms` is the wall clock in milliseconds since the epoch.
pub fn should_check(current_block: u64, tx: &PendingTransaction, now_ms: u64) -> bool {
    if tx.receipt.is_some() {
        return false;
    }
    let Some(last_checked) = tx.last_checked_block_number else {
        return true;
    };
    if current_block <= last_checked {
        return false;
    }
    let blocks_since_check = current_block - last_checked;

    // Thresholds are strict: exactly 60 minutes pending is still the medium tier.
    let pending_ms = now_ms.saturating_sub(tx.added_time);
    if pending_ms > SLOW_TIER_MINUTES * MILLIS_PER_MINUTE {
        blocks_since_check > 9
    } else if pending_ms > MEDIUM_TIER_MINUTES * MILLIS_PER_MINUTE {
        blocks_since_check > 2
    } else {
        true
    }
}
