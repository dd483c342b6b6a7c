//! Sentinel Configuration
//!
//! Process-wide settings fixed at startup. Values come from `TXNSCOPE_*`
//! environment variables, falling back to the defaults below.

use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::U256;
use thiserror::Error;

use crate::enrichment::BuildInfo;
use crate::ipc::{DEFAULT_IPC_PATHS, DEFAULT_MAX_RECONNECTS, DEFAULT_MAX_RPC_FAILURES};
use crate::publisher::DEFAULT_CHANNEL;
use crate::retry::DEFAULT_MAX_RETRIES;

/// Dispatch timeout budget for deployments handling events one at a time
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Dispatch timeout budget for deployments running many detector units,
/// selected with `TXNSCOPE_EXTENDED_TIMEOUT=true`
pub const EXTENDED_TIMEOUT_MS: u64 = 60000;

/// How often the block source polls for a new head
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default Redis endpoint for alert publication
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default threshold for the large transfer detector: 100 ETH
pub const DEFAULT_LARGE_TRANSFER_WEI: u128 = 100_000_000_000_000_000_000;

/// Errors that can occur while loading configuration
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("max_retries must be at least 1")]
    ZeroRetries,

    #[error("timeout_ms must be greater than 0")]
    ZeroTimeout,

    #[error("max_rpc_failures must be at least 1")]
    ZeroRpcFailures,
}

/// Configuration for the sentinel process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelConfig {
    /// Wall-clock budget for one dispatch in milliseconds
    pub timeout_ms: u64,
    /// Attempts per detector invocation
    pub max_retries: u32,
    /// Commit hash override; the compiled-in value is used when unset
    pub commit_hash: Option<String>,
    /// Commit message override; the compiled-in value is used when unset
    pub commit_message: Option<String>,
    /// Path to the node's IPC socket
    pub ipc_path: String,
    /// Block polling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Reconnection attempts after the node connection drops
    pub max_reconnects: u32,
    /// Consecutive rejected node requests tolerated for one block
    pub max_rpc_failures: u32,
    pub redis_url: String,
    /// Pub/sub channel alerts are published to
    pub channel: String,
    /// Native value threshold for the large transfer detector, in wei
    pub large_transfer_wei: U256,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            commit_hash: None,
            commit_message: None,
            ipc_path: DEFAULT_IPC_PATHS[0].to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_reconnects: DEFAULT_MAX_RECONNECTS,
            max_rpc_failures: DEFAULT_MAX_RPC_FAILURES,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            large_transfer_wei: U256::from(DEFAULT_LARGE_TRANSFER_WEI),
        }
    }
}

impl SentinelConfig {
    /// Load from the process environment and validate
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup and validate
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(true) = parsed::<_, bool>(&lookup, "TXNSCOPE_EXTENDED_TIMEOUT")? {
            config.timeout_ms = EXTENDED_TIMEOUT_MS;
        }
        // An explicit budget overrides the extended preset
        if let Some(v) = parsed(&lookup, "TXNSCOPE_TIMEOUT_MS")? {
            config.timeout_ms = v;
        }
        if let Some(v) = parsed(&lookup, "TXNSCOPE_MAX_RETRIES")? {
            config.max_retries = v;
        }
        if let Some(v) = parsed(&lookup, "TXNSCOPE_POLL_INTERVAL_MS")? {
            config.poll_interval_ms = v;
        }
        if let Some(v) = parsed(&lookup, "TXNSCOPE_MAX_RECONNECTS")? {
            config.max_reconnects = v;
        }
        if let Some(v) = parsed(&lookup, "TXNSCOPE_MAX_RPC_FAILURES")? {
            config.max_rpc_failures = v;
        }
        if let Some(v) = parsed(&lookup, "TXNSCOPE_LARGE_TRANSFER_WEI")? {
            config.large_transfer_wei = v;
        }
        config.commit_hash = lookup("TXNSCOPE_COMMIT_HASH");
        config.commit_message = lookup("TXNSCOPE_COMMIT_MESSAGE");
        if let Some(v) = lookup("TXNSCOPE_IPC_PATH") {
            config.ipc_path = v;
        }
        if let Some(v) = lookup("TXNSCOPE_REDIS_URL") {
            config.redis_url = v;
        }
        if let Some(v) = lookup("TXNSCOPE_CHANNEL") {
            config.channel = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants the dispatcher relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_rpc_failures == 0 {
            return Err(ConfigError::ZeroRpcFailures);
        }
        if self.ipc_path.is_empty() {
            return Err(ConfigError::Empty("ipc_path"));
        }
        if self.channel.is_empty() {
            return Err(ConfigError::Empty("channel"));
        }
        Ok(())
    }

    /// Dispatch timeout budget
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Build identifiers, preferring configured overrides
    pub fn build_info(&self) -> BuildInfo {
        let compiled = BuildInfo::compiled();
        BuildInfo::new(
            self.commit_hash.clone().unwrap_or(compiled.commit_hash),
            self.commit_message.clone().unwrap_or(compiled.commit_message),
        )
    }
}

fn parsed<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
    }
}
