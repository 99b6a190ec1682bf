use super::receipt::Receipt;
use serde::{Deserialize, Serialize};

/// Numeric identifier of the network a transaction was submitted on.
pub type ChainId = u64;

/// A transaction submitted locally and tracked until a receipt shows up or it
/// expires.
///
/// `added_time` is in milliseconds since the epoch; `deadline` is an on-chain
/// timestamp in seconds since the epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub hash: String,
    pub chain_id: ChainId,
    pub added_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked_block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Receipt>,
}

impl PendingTransaction {
    pub fn new(hash: impl Into<String>, chain_id: ChainId, added_time: u64) -> Self {
        Self {
            hash: hash.into(),
            chain_id,
            added_time,
            deadline: None,
            last_checked_block_number: None,
            receipt: None,
        }
    }

    pub fn with_deadline(mut self, deadline: u64) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_last_checked_block(mut self, block_number: u64) -> Self {
        self.last_checked_block_number = Some(block_number);
        self
    }

    /// A transaction stays pending until a receipt is attached.
    pub fn is_pending(&self) -> bool {
        self.receipt.is_none()
    }
}

/// Payload handed to the state sink once a receipt is found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionConfirmation {
    pub transaction: PendingTransaction,
    pub receipt: Receipt,
    pub chain_id: ChainId,
}
