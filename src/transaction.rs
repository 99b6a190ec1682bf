//! Domain types shared by the poller, the provider and state sinks: locally
//! tracked transactions, their confirmed receipts, and confirmation events.

pub mod pending;
pub mod receipt;

pub use pending::{ChainId, PendingTransaction, TransactionConfirmation};
pub use receipt::Receipt;
