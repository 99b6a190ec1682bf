//! Runtime glue: configuration, the chain head, the state sink and its
//! in-memory store, telemetry, and the watcher that wires them together.

pub mod clock;
pub mod config;
pub mod head;
pub mod runner;
pub mod sink;
pub mod store;
pub mod telemetry;
