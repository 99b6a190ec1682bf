//! `jsonrpsee` HTTP client speaking the Ethereum JSON-RPC methods the tracker
//! needs: `eth_getTransactionReceipt`, `eth_blockNumber` and
//! `eth_getBlockByNumber`.

use crate::rpc::metrics::{RpcMetrics, RpcMetricsSnapshot};
use crate::rpc::options::RpcClientOptions;
use crate::rpc::provider::ChainProvider;
use crate::rpc::wire::{parse_quantity, to_quantity, RawBlockHeader, RawReceipt};
use crate::transaction::Receipt;
use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::time::{timeout, Instant};

const GET_RECEIPT: &str = "eth_getTransactionReceipt";
const BLOCK_NUMBER: &str = "eth_blockNumber";
const GET_BLOCK: &str = "eth_getBlockByNumber";

#[derive(Debug)]
pub enum RpcError {
    Timeout { method: &'static str },
    InvalidResponse { method: &'static str, reason: String },
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::InvalidResponse { method, reason } => {
                write!(f, "rpc method {method} returned an invalid response: {reason}")
            }
        }
    }
}

impl std::error::Error for RpcError {}

#[derive(Debug, Clone)]
pub struct AsyncRpcClient {
    rpc_url: Arc<String>,
    client: HttpClient,
    options: RpcClientOptions,
    metrics: Arc<RpcMetrics>,
}

impl AsyncRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_options(url, RpcClientOptions::default())
    }

    pub fn with_options(url: impl Into<String>, options: RpcClientOptions) -> Result<Self> {
        options.validate()?;

        let rpc_url = url.into();
        let max_response_body_size = options.max_response_body_bytes.min(u32::MAX as usize) as u32;

        let client = HttpClientBuilder::default()
            .request_timeout(options.request_timeout)
            .max_concurrent_requests(options.max_concurrent_requests)
            .max_response_size(max_response_body_size)
            .build(&rpc_url)
            .map_err(|err| anyhow!("failed to build RPC client: {err}"))?;

        Ok(Self {
            rpc_url: Arc::new(rpc_url),
            client,
            options,
            metrics: Arc::new(RpcMetrics::default()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.rpc_url
    }

    pub fn metrics(&self) -> RpcMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn get_transaction_receipt(&self, hash: &str) -> Result<Option<Receipt>> {
        let raw: Option<RawReceipt> = self.call(GET_RECEIPT, rpc_params![hash]).await?;
        let Some(raw) = raw else {
            self.metrics.record_missing_receipt();
            tracing::trace!(hash, "receipt not available yet");
            return Ok(None);
        };

        let receipt = Receipt::try_from(raw).map_err(|err| RpcError::InvalidResponse {
            method: GET_RECEIPT,
            reason: format!("{err:#}"),
        })?;
        tracing::debug!(
            hash,
            block_number = receipt.block_number,
            status = ?receipt.status,
            "fetched transaction receipt"
        );
        Ok(Some(receipt))
    }

    pub async fn get_block_number(&self) -> Result<u64> {
        let raw: String = self.call(BLOCK_NUMBER, rpc_params![]).await?;
        parse_quantity(&raw).map_err(|err| {
            RpcError::InvalidResponse {
                method: BLOCK_NUMBER,
                reason: format!("{err:#}"),
            }
            .into()
        })
    }

    pub async fn get_block_timestamp(&self, block_number: u64) -> Result<u64> {
        let header: Option<RawBlockHeader> = self
            .call(GET_BLOCK, rpc_params![to_quantity(block_number), false])
            .await?;
        let header = header
            .ok_or_else(|| RpcError::InvalidResponse {
                method: GET_BLOCK,
                reason: format!("block {block_number} not found"),
            })
            .with_context(|| format!("failed to load block {block_number}"))?;
        header
            .timestamp()
            .with_context(|| format!("failed to decode block {block_number}"))
    }

    /// Issues a single request with the configured timeout and records metrics.
    async fn call<R>(&self, method: &'static str, params: ArrayParams) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let start = Instant::now();
        let response = timeout(
            self.options.request_timeout,
            self.client.request::<R, _>(method, params),
        )
        .await;

        match response {
            Ok(Ok(value)) => {
                self.metrics.record_success(start.elapsed());
                Ok(value)
            }
            Ok(Err(JsonRpcError::RequestTimeout)) | Err(_) => {
                self.metrics.record_timeout(start.elapsed());
                Err(RpcError::Timeout { method }.into())
            }
            Ok(Err(JsonRpcError::ParseError(err))) => {
                self.metrics.record_failure(start.elapsed());
                Err(RpcError::InvalidResponse {
                    method,
                    reason: err.to_string(),
                }
                .into())
            }
            Ok(Err(err)) => {
                self.metrics.record_failure(start.elapsed());
                Err(anyhow!("rpc {method} call failed: {err}"))
            }
        }
    }
}

impl ChainProvider for AsyncRpcClient {
    fn transaction_receipt<'a>(&'a self, hash: &'a str) -> BoxFuture<'a, Result<Option<Receipt>>> {
        Box::pin(self.get_transaction_receipt(hash))
    }

    fn block_number(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(self.get_block_number())
    }

    fn block_timestamp(&self, block_number: u64) -> BoxFuture<'_, Result<u64>> {
        Box::pin(self.get_block_timestamp(block_number))
    }
}
