//! Polling orchestration: which pending transactions to check on a block, how
//! each receipt lookup is retried and cancelled, when an unconfirmed
//! transaction is dropped, and how outcomes are routed to the state sink.

pub(crate) mod backoff;
pub mod expiry;
pub mod fetcher;
pub mod lifecycle;
pub mod poller;
pub mod retry_policy;
pub mod schedule;
