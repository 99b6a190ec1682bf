//! JSON-RPC plumbing for EVM nodes: the provider abstraction consumed by the
//! poller, the `jsonrpsee` client implementing it, wire decoding, options and
//! metrics.

pub mod client;
pub mod metrics;
pub mod options;
pub mod provider;
pub mod wire;

pub use client::{AsyncRpcClient, RpcError};
pub use metrics::RpcMetricsSnapshot;
pub use options::RpcClientOptions;
pub use provider::ChainProvider;
