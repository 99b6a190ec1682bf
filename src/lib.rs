pub mod processor;
pub mod rpc;
pub mod runtime;
pub mod transaction;

pub use processor::expiry::{is_expired, DEFAULT_MAX_PENDING_AGE};
pub use processor::fetcher::{FetchContext, FetchHandle, FetchOutcome, ReceiptFetcher};
pub use processor::lifecycle::ChainContext;
pub use processor::poller::{PendingTransactionPoller, PreconditionUnmet, TickContext, TickReport};
pub use processor::retry_policy::{RetryOptions, RetryPolicy, MODE_MAINNET};
pub use processor::schedule::should_check;
pub use rpc::{AsyncRpcClient, ChainProvider, RpcClientOptions, RpcError, RpcMetricsSnapshot};
pub use runtime::clock::{Clock, ManualClock, SystemClock};
pub use runtime::config::{WatcherConfig, WatcherConfigBuilder, WatcherConfigParams};
pub use runtime::head::{ChainHead, HeadSnapshot};
pub use runtime::runner::TransactionWatcher;
pub use runtime::sink::{SinkCommand, SinkCommandKind, SinkError, SinkHandle, SinkWriter, StateSink};
pub use runtime::store::TransactionStore;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use transaction::{ChainId, PendingTransaction, Receipt, TransactionConfirmation};
