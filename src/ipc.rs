//! IPC Event Source
//!
//! Talks to a node over its Unix IPC socket and turns each new block into the
//! block and transaction events the dispatcher consumes.
//!
//! Failures are split in two. Transport failures (socket gone, backend
//! closed) are healed by reconnecting with exponential backoff. Method
//! failures (the node answered with an error, or with a payload that does not
//! parse) will not go away by reconnecting, so the block source retries them
//! a bounded number of times and then gives up.

use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxHash, B256, U256, U64};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::pubsub::PubSubFrontend;
use alloy::rpc::json_rpc::{RpcParam, RpcReturn};
use alloy::transports::ipc::IpcConnect;
use alloy::transports::{RpcError, TransportError};
use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::event::{BlockEvent, LogEntry, TransactionEvent};

/// Socket locations probed when the configured one does not exist
pub const DEFAULT_IPC_PATHS: &[&str] = &[
    "/tmp/anvil.ipc",
    "~/.foundry/anvil.ipc",
    "/var/run/geth.ipc",
    "~/.ethereum/geth.ipc",
];

pub const DEFAULT_MAX_RECONNECTS: u32 = 10;

/// Consecutive method failures tolerated before the block source gives up
pub const DEFAULT_MAX_RPC_FAILURES: u32 = 5;

const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IPC socket not found at path: {0}")]
    SocketNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Gave up reconnecting after {0} attempts")]
    ReconnectExhausted(u32),

    #[error("Transport failed during {method}: {message}")]
    Transport { method: &'static str, message: String },

    #[error("Node rejected {method}: {message}")]
    Rpc { method: &'static str, message: String },
}

impl IpcError {
    /// Whether reconnecting may cure the failure
    pub fn is_transport(&self) -> bool {
        !matches!(self, IpcError::Rpc { .. })
    }

    fn from_request(method: &'static str, e: TransportError) -> Self {
        let message = e.to_string();
        match e {
            RpcError::ErrorResp(_) | RpcError::NullResp | RpcError::DeserError { .. } => {
                IpcError::Rpc { method, message }
            }
            _ => IpcError::Transport { method, message },
        }
    }
}

/// Exponential backoff between reconnection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECTS,
            base: BACKOFF_BASE,
            cap: BACKOFF_CAP,
        }
    }
}

impl ReconnectPolicy {
    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self { max_attempts, ..self }
    }

    /// Wait before reconnection attempt `attempt` (zero based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(1 << attempt.min(16)).min(self.cap)
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

pub fn socket_exists(path: &str) -> bool {
    expand_path(path).exists()
}

/// Pick the socket to connect to
///
/// The configured path wins when it exists; otherwise the first existing
/// well-known location, and failing that the configured path so the error
/// names what the operator asked for.
pub fn resolve_socket(configured: &str) -> String {
    std::iter::once(configured)
        .chain(DEFAULT_IPC_PATHS.iter().copied())
        .map(expand_path)
        .find(|path| path.exists())
        .unwrap_or_else(|| expand_path(configured))
        .to_string_lossy()
        .into_owned()
}

/// A node connection that can be re-established after transport failures
pub struct IpcConnection {
    path: String,
    policy: ReconnectPolicy,
    attempts: u32,
}

impl IpcConnection {
    pub fn new(path: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            attempts: 0,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Reconnection attempts since the last successful connect
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub async fn connect(&mut self) -> Result<RootProvider<PubSubFrontend>, IpcError> {
        let path = expand_path(&self.path);
        if !Path::new(&path).exists() {
            return Err(IpcError::SocketNotFound(path.display().to_string()));
        }

        let ipc = IpcConnect::new(path.to_string_lossy().into_owned());
        let provider = ProviderBuilder::new()
            .on_ipc(ipc)
            .await
            .map_err(|e| IpcError::ConnectionFailed(e.to_string()))?;

        info!(path = %path.display(), after_attempts = self.attempts, "node connection established");
        self.attempts = 0;
        Ok(provider)
    }

    /// Reconnect, backing off between attempts until the policy runs out
    pub async fn reconnect(&mut self) -> Result<RootProvider<PubSubFrontend>, IpcError> {
        while self.attempts < self.policy.max_attempts {
            let delay = self.policy.delay(self.attempts);
            self.attempts += 1;
            warn!(
                attempt = self.attempts,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "reconnecting to node"
            );
            sleep(delay).await;

            match self.connect().await {
                Ok(provider) => return Ok(provider),
                Err(e) => error!(attempt = self.attempts, error = %e, "reconnect failed"),
            }
        }

        Err(IpcError::ReconnectExhausted(self.policy.max_attempts))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    number: U64,
    hash: B256,
    timestamp: U64,
    #[serde(default)]
    transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
struct RpcTransaction {
    hash: TxHash,
    from: Address,
    to: Option<Address>,
    value: U256,
    input: Bytes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: TxHash,
    #[serde(default)]
    logs: Vec<RpcLog>,
}

#[derive(Debug, Deserialize)]
struct RpcLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
}

/// One block worth of events
#[derive(Debug, Clone, PartialEq)]
pub struct ChainEvents {
    pub block: BlockEvent,
    pub transactions: Vec<TransactionEvent>,
}

fn into_events(block: RpcBlock, mut receipts: Vec<RpcReceipt>) -> ChainEvents {
    let number = block.number.to::<u64>();
    let timestamp = block.timestamp.to::<u64>();

    let transactions: Vec<TransactionEvent> = block
        .transactions
        .into_iter()
        .map(|tx| {
            let logs = receipts
                .iter_mut()
                .find(|r| r.transaction_hash == tx.hash)
                .map(|r| std::mem::take(&mut r.logs))
                .unwrap_or_default()
                .into_iter()
                .map(|log| LogEntry {
                    address: log.address,
                    topics: log.topics,
                    data: log.data,
                })
                .collect();

            TransactionEvent {
                hash: tx.hash,
                from: tx.from,
                to: tx.to,
                value: tx.value,
                input: tx.input,
                block_number: number,
                timestamp,
                logs,
            }
        })
        .collect();

    ChainEvents {
        block: BlockEvent {
            number,
            hash: block.hash,
            timestamp,
            transactions: transactions.iter().map(|tx| tx.hash).collect(),
        },
        transactions,
    }
}

/// Consecutive method failures seen while fetching the current block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FailureStreak {
    limit: u32,
    count: u32,
}

impl FailureStreak {
    fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            count: 0,
        }
    }

    /// Count a failure; false once the limit is reached
    fn record(&mut self) -> bool {
        self.count += 1;
        self.count < self.limit
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// Polls the node for new blocks, yielding them strictly in order
pub struct BlockSource {
    provider: RootProvider<PubSubFrontend>,
    next_block: u64,
    poll_interval: Duration,
    failures: FailureStreak,
    block_receipts: bool,
}

impl BlockSource {
    /// Start yielding blocks from `start_block` onwards
    pub fn new(provider: RootProvider<PubSubFrontend>, start_block: u64, poll_interval: Duration) -> Self {
        Self {
            provider,
            next_block: start_block,
            poll_interval,
            failures: FailureStreak::new(DEFAULT_MAX_RPC_FAILURES),
            block_receipts: true,
        }
    }

    pub fn with_max_rpc_failures(mut self, limit: u32) -> Self {
        self.failures = FailureStreak::new(limit);
        self
    }

    /// Number of the block the next call to `next` will yield
    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    /// Replace the provider after a reconnect, keeping the position
    pub fn set_provider(&mut self, provider: RootProvider<PubSubFrontend>) {
        self.provider = provider;
    }

    async fn request<P, R>(&self, method: &'static str, params: P) -> Result<R, IpcError>
    where
        P: RpcParam,
        R: RpcReturn,
    {
        self.provider
            .raw_request(method.into(), params)
            .await
            .map_err(|e| IpcError::from_request(method, e))
    }

    pub async fn head(&self) -> Result<u64, IpcError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| IpcError::from_request("eth_blockNumber", e))
    }

    /// Fetch a block with its transactions and their logs
    ///
    /// Nodes without `eth_getBlockReceipts` are detected on first use; from
    /// then on receipts are fetched one transaction at a time.
    pub async fn fetch(&mut self, number: u64) -> Result<Option<ChainEvents>, IpcError> {
        let tag = format!("{:#x}", number);

        let block: Option<RpcBlock> = self.request("eth_getBlockByNumber", (tag.clone(), true)).await?;
        let Some(block) = block else {
            return Ok(None);
        };

        if self.block_receipts {
            match self.request::<_, Option<Vec<RpcReceipt>>>("eth_getBlockReceipts", (tag,)).await {
                Ok(receipts) => return Ok(Some(into_events(block, receipts.unwrap_or_default()))),
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "block receipts unsupported, falling back to per-transaction receipts");
                    self.block_receipts = false;
                }
            }
        }

        let mut receipts = Vec::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            let receipt: Option<RpcReceipt> = self.request("eth_getTransactionReceipt", (tx.hash,)).await?;
            receipts.extend(receipt);
        }
        Ok(Some(into_events(block, receipts)))
    }

    /// Wait for and return the next block
    ///
    /// Transport failures are returned at once so the caller can reconnect.
    /// Method failures are retried on the poll interval and returned once
    /// they happen too many times in a row for the same block.
    pub async fn next(&mut self) -> Result<ChainEvents, IpcError> {
        loop {
            match self.poll().await {
                Ok(Some(events)) => {
                    self.failures.reset();
                    return Ok(events);
                }
                Ok(None) => {}
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => {
                    if !self.failures.record() {
                        return Err(e);
                    }
                    warn!(
                        block = self.next_block,
                        failures = self.failures.count,
                        error = %e,
                        "node request failed, retrying"
                    );
                }
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn poll(&mut self) -> Result<Option<ChainEvents>, IpcError> {
        if self.next_block > self.head().await? {
            return Ok(None);
        }
        let Some(events) = self.fetch(self.next_block).await? else {
            return Ok(None);
        };

        debug!(
            block = self.next_block,
            transactions = events.transactions.len(),
            "fetched block"
        );
        self.next_block += 1;
        Ok(Some(events))
    }
}
