//! Per-chain retry parameters for receipt lookups.

use crate::transaction::ChainId;
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::time::Duration;

/// Mode mainnet, the only chain retried within a tick by default.
pub const MODE_MAINNET: ChainId = 34443;

/// Bounded retry parameters for one receipt lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    pub max_attempts: usize,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl RetryOptions {
    /// A single attempt and no delay.
    pub const NO_RETRY: RetryOptions = RetryOptions {
        max_attempts: 1,
        min_wait: Duration::ZERO,
        max_wait: Duration::ZERO,
    };

    pub fn new(max_attempts: usize, min_wait: Duration, max_wait: Duration) -> Self {
        Self {
            max_attempts,
            min_wait,
            max_wait,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }
        if self.min_wait > self.max_wait {
            bail!(
                "min_wait ({:?}) must not exceed max_wait ({:?})",
                self.min_wait,
                self.max_wait
            );
        }
        Ok(())
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::NO_RETRY
    }
}

/// Chain id to [`RetryOptions`] table with a fallback for unlisted chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    by_chain: HashMap<ChainId, RetryOptions>,
    fallback: RetryOptions,
}

impl RetryPolicy {
    /// A table with no entries: every chain gets a single attempt.
    pub fn empty() -> Self {
        Self {
            by_chain: HashMap::new(),
            fallback: RetryOptions::NO_RETRY,
        }
    }

    pub fn with_chain(mut self, chain_id: ChainId, options: RetryOptions) -> Self {
        self.by_chain.insert(chain_id, options);
        self
    }

    pub fn with_fallback(mut self, options: RetryOptions) -> Self {
        self.fallback = options;
        self
    }

    pub fn options_for(&self, chain_id: ChainId) -> RetryOptions {
        self.by_chain
            .get(&chain_id)
            .copied()
            .unwrap_or(self.fallback)
    }

    pub fn fallback(&self) -> RetryOptions {
        self.fallback
    }

    pub fn chains(&self) -> impl Iterator<Item = (ChainId, RetryOptions)> + '_ {
        self.by_chain.iter().map(|(chain, options)| (*chain, *options))
    }

    pub fn validate(&self) -> Result<()> {
        if let Err(err) = self.fallback.validate() {
            bail!("invalid fallback retry options: {err}");
        }
        for (chain_id, options) in &self.by_chain {
            if let Err(err) = options.validate() {
                bail!("invalid retry options for chain {chain_id}: {err}");
            }
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::empty().with_chain(
            MODE_MAINNET,
            RetryOptions::new(10, Duration::from_millis(250), Duration::from_millis(1_000)),
        )
    }
}
