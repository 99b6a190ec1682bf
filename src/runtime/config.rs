use crate::processor::expiry::DEFAULT_MAX_PENDING_AGE;
use crate::processor::retry_policy::{RetryOptions, RetryPolicy};
use crate::rpc::RpcClientOptions;
use crate::runtime::telemetry;
use crate::transaction::ChainId;
use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;
const DEFAULT_BLOCK_REFRESH_INTERVAL_SECS: u64 = 4;
const DEFAULT_SINK_QUEUE_CAPACITY: usize = 256;

const ENV_RPC_TIMEOUT_SECS: &str = "CONFIRMWATCH_RPC_TIMEOUT_SECS";
const ENV_BLOCK_REFRESH_MS: &str = "CONFIRMWATCH_BLOCK_REFRESH_MS";
const ENV_MAX_PENDING_AGE_SECS: &str = "CONFIRMWATCH_MAX_PENDING_AGE_SECS";
const ENV_METRICS_INTERVAL_SECS: &str = "CONFIRMWATCH_METRICS_INTERVAL_SECS";
const ENV_SINK_QUEUE_CAPACITY: &str = "CONFIRMWATCH_SINK_QUEUE_CAPACITY";
const ENV_RETRY: &str = "CONFIRMWATCH_RETRY";

/// Runtime configuration for the transaction watcher.
///
/// All instances must be constructed via [`WatcherConfig::builder`] or [`WatcherConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    retry_policy: RetryPolicy,
    block_refresh_interval: Duration,
    max_pending_age: Duration,
    metrics_interval: Duration,
    sink_queue_capacity: usize,
    rpc_timeout: Duration,
}

pub struct WatcherConfigParams {
    pub retry_policy: RetryPolicy,
    pub block_refresh_interval: Duration,
    pub max_pending_age: Duration,
    pub metrics_interval: Duration,
    pub sink_queue_capacity: usize,
    pub rpc_timeout: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            block_refresh_interval: Duration::from_secs(DEFAULT_BLOCK_REFRESH_INTERVAL_SECS),
            max_pending_age: DEFAULT_MAX_PENDING_AGE,
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
            sink_queue_capacity: DEFAULT_SINK_QUEUE_CAPACITY,
            rpc_timeout: Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS),
        }
    }
}

impl WatcherConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> WatcherConfigBuilder {
        WatcherConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: WatcherConfigParams) -> Result<Self> {
        let WatcherConfigParams {
            retry_policy,
            block_refresh_interval,
            max_pending_age,
            metrics_interval,
            sink_queue_capacity,
            rpc_timeout,
        } = params;

        let config = Self {
            retry_policy,
            block_refresh_interval,
            max_pending_age,
            metrics_interval,
            sink_queue_capacity,
            rpc_timeout,
        };

        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from the defaults overridden by `CONFIRMWATCH_*`
    /// environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Self::builder();

        if let Some(secs) = parse_var::<u64>(&lookup, ENV_RPC_TIMEOUT_SECS)? {
            builder = builder.rpc_timeout(Duration::from_secs(secs));
        }
        if let Some(millis) = parse_var::<u64>(&lookup, ENV_BLOCK_REFRESH_MS)? {
            builder = builder.block_refresh_interval(Duration::from_millis(millis));
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_MAX_PENDING_AGE_SECS)? {
            builder = builder.max_pending_age(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_METRICS_INTERVAL_SECS)? {
            builder = builder.metrics_interval(Duration::from_secs(secs));
        }
        if let Some(capacity) = parse_var::<usize>(&lookup, ENV_SINK_QUEUE_CAPACITY)? {
            builder = builder.sink_queue_capacity(capacity);
        }
        if let Some(table) = lookup(ENV_RETRY) {
            let policy = parse_retry_table(&table)
                .with_context(|| format!("failed to parse {ENV_RETRY}"))?;
            builder = builder.retry_policy(policy);
        }

        builder.build()
    }

    /// Per-chain retry table used by receipt lookups.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Interval between latest-block polls.
    pub fn block_refresh_interval(&self) -> Duration {
        self.block_refresh_interval
    }

    /// Age after which a transaction without a deadline is removed.
    pub fn max_pending_age(&self) -> Duration {
        self.max_pending_age
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Bound of the queue between lookups and the state sink writer.
    pub fn sink_queue_capacity(&self) -> usize {
        self.sink_queue_capacity
    }

    /// Per-RPC timeout applied to the JSON-RPC client.
    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    pub fn rpc_client_options(&self) -> RpcClientOptions {
        RpcClientOptions {
            request_timeout: self.rpc_timeout,
            ..RpcClientOptions::default()
        }
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        self.retry_policy
            .validate()
            .context("retry_policy is invalid")?;

        if self.block_refresh_interval.is_zero() {
            bail!("block_refresh_interval must be greater than 0");
        }

        if self.max_pending_age.is_zero() {
            bail!("max_pending_age must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.sink_queue_capacity == 0 {
            bail!("sink_queue_capacity must be greater than 0");
        }

        if self.rpc_timeout.is_zero() {
            bail!("rpc_timeout must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct WatcherConfigBuilder {
    retry_policy: Option<RetryPolicy>,
    block_refresh_interval: Option<Duration>,
    max_pending_age: Option<Duration>,
    metrics_interval: Option<Duration>,
    sink_queue_capacity: Option<usize>,
    rpc_timeout: Option<Duration>,
}

impl WatcherConfigBuilder {
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn block_refresh_interval(mut self, interval: Duration) -> Self {
        self.block_refresh_interval = Some(interval);
        self
    }

    pub fn max_pending_age(mut self, age: Duration) -> Self {
        self.max_pending_age = Some(age);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn sink_queue_capacity(mut self, capacity: usize) -> Self {
        self.sink_queue_capacity = Some(capacity);
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<WatcherConfig> {
        let defaults = WatcherConfig::default();
        let params = WatcherConfigParams {
            retry_policy: self.retry_policy.unwrap_or(defaults.retry_policy),
            block_refresh_interval: self
                .block_refresh_interval
                .unwrap_or(defaults.block_refresh_interval),
            max_pending_age: self.max_pending_age.unwrap_or(defaults.max_pending_age),
            metrics_interval: self.metrics_interval.unwrap_or(defaults.metrics_interval),
            sink_queue_capacity: self
                .sink_queue_capacity
                .unwrap_or(defaults.sink_queue_capacity),
            rpc_timeout: self.rpc_timeout.unwrap_or(defaults.rpc_timeout),
        };

        WatcherConfig::new(params)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let value = raw
        .trim()
        .parse::<T>()
        .with_context(|| format!("{name} has an invalid value: {raw:?}"))?;
    Ok(Some(value))
}

/// Parses `chain:attempts:min_ms:max_ms` entries separated by commas. The
/// resulting table replaces the default one entirely.
fn parse_retry_table(raw: &str) -> Result<RetryPolicy> {
    let mut policy = RetryPolicy::empty();

    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let fields: Vec<&str> = entry.split(':').map(str::trim).collect();
        let [chain_id, attempts, min_ms, max_ms] = fields.as_slice() else {
            bail!("retry entry {entry:?} must look like chain:attempts:min_ms:max_ms");
        };

        let chain_id: ChainId = chain_id
            .parse()
            .with_context(|| format!("invalid chain id in {entry:?}"))?;
        let attempts: usize = attempts
            .parse()
            .with_context(|| format!("invalid attempt count in {entry:?}"))?;
        let min_ms: u64 = min_ms
            .parse()
            .with_context(|| format!("invalid min_ms in {entry:?}"))?;
        let max_ms: u64 = max_ms
            .parse()
            .with_context(|| format!("invalid max_ms in {entry:?}"))?;

        policy = policy.with_chain(
            chain_id,
            RetryOptions::new(
                attempts,
                Duration::from_millis(min_ms),
                Duration::from_millis(max_ms),
            ),
        );
    }

    Ok(policy)
}
