use serde::{Deserialize, Serialize};

/// Proof that a transaction was included in a block.
///
/// Only produced from a fully decoded node response; see
/// [`crate::rpc::wire::RawReceipt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub block_hash: String,
    pub block_number: u64,
    pub contract_address: Option<String>,
    pub from: String,
    pub to: Option<String>,
    /// `1` for success, `0` for revert. Absent on pre-Byzantium receipts.
    pub status: Option<u64>,
    pub transaction_hash: String,
    pub transaction_index: u64,
}

impl Receipt {
    pub fn succeeded(&self) -> bool {
        self.status == Some(1)
    }
}
