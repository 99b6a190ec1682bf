//! Wire representations returned by EVM JSON-RPC nodes plus helpers that turn
//! hex quantities into integers.

use crate::transaction::Receipt;
use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Decodes a `0x`-prefixed hex quantity as used by Ethereum JSON-RPC.
pub fn parse_quantity(value: &str) -> Result<u64> {
    let trimmed = value.trim();
    let Some(digits) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    else {
        bail!("quantity {trimmed:?} is missing the 0x prefix");
    };
    if digits.is_empty() {
        bail!("quantity {trimmed:?} has no digits");
    }
    u64::from_str_radix(digits, 16).with_context(|| format!("invalid hex quantity {trimmed:?}"))
}

/// Encodes a block number as a JSON-RPC quantity.
pub fn to_quantity(value: u64) -> String {
    format!("{value:#x}")
}

/// `eth_getTransactionReceipt` result as sent by the node.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReceipt {
    pub block_hash: Option<String>,
    pub block_number: Option<String>,
    #[serde(default)]
    pub contract_address: Option<String>,
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub transaction_hash: String,
    pub transaction_index: Option<String>,
}

impl TryFrom<RawReceipt> for Receipt {
    type Error = anyhow::Error;

    fn try_from(raw: RawReceipt) -> Result<Self> {
        let block_hash = raw
            .block_hash
            .context("receipt is missing blockHash")?;
        let block_number = parse_quantity(
            raw.block_number
                .as_deref()
                .context("receipt is missing blockNumber")?,
        )
        .context("invalid receipt blockNumber")?;
        let transaction_index = parse_quantity(
            raw.transaction_index
                .as_deref()
                .context("receipt is missing transactionIndex")?,
        )
        .context("invalid receipt transactionIndex")?;
        let status = raw
            .status
            .as_deref()
            .map(parse_quantity)
            .transpose()
            .context("invalid receipt status")?;

        Ok(Receipt {
            block_hash,
            block_number,
            contract_address: raw.contract_address,
            from: raw.from,
            to: raw.to,
            status,
            transaction_hash: raw.transaction_hash,
            transaction_index,
        })
    }
}

/// Subset of `eth_getBlockByNumber` needed to evaluate deadlines.
#[derive(Debug, Clone, Deserialize)]
pub struct RawBlockHeader {
    pub timestamp: String,
}

impl RawBlockHeader {
    pub fn timestamp(&self) -> Result<u64> {
        parse_quantity(&self.timestamp).context("invalid block timestamp")
    }
}
