//! Built-in Detector Units
//!
//! The units a default deployment registers. Each is a plain function over
//! one event so it can be tested without the dispatcher.

use std::collections::HashMap;
use std::sync::LazyLock;

use alloy::primitives::U256;

use crate::alert::{Alert, AlertType, Severity};
use crate::config::SentinelConfig;
use crate::detector::{DetectorUnit, InitMetadata};
use crate::event::{BlockEvent, TransactionEvent};
use crate::registry::{DetectorRegistry, RegistryError};

pub const DEX_ACTIVITY_ALERT_ID: &str = "TXNSCOPE-DEX-ACTIVITY";
pub const LARGE_TRANSFER_ALERT_ID: &str = "TXNSCOPE-LARGE-TRANSFER";
pub const EMPTY_BLOCK_ALERT_ID: &str = "TXNSCOPE-EMPTY-BLOCK";

/// Uniswap V2 style router methods that move liquidity or swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DexMethod {
    /// addLiquidityETH - 0xf305d719
    AddLiquidityEth,
    /// addLiquidity - 0xe8e33700
    AddLiquidity,
    /// swapExactETHForTokens - 0x7ff36ab5
    SwapExactEthForTokens,
    /// swapExactTokensForTokens - 0x38ed1739
    SwapExactTokensForTokens,
    /// swapTokensForExactTokens - 0x8803dbee
    SwapTokensForExactTokens,
    /// swapExactTokensForETH - 0x18cbafe5
    SwapExactTokensForEth,
}

impl DexMethod {
    pub const ALL: [DexMethod; 6] = [
        DexMethod::AddLiquidityEth,
        DexMethod::AddLiquidity,
        DexMethod::SwapExactEthForTokens,
        DexMethod::SwapExactTokensForTokens,
        DexMethod::SwapTokensForExactTokens,
        DexMethod::SwapExactTokensForEth,
    ];

    pub fn selector(&self) -> [u8; 4] {
        match self {
            DexMethod::AddLiquidityEth => [0xf3, 0x05, 0xd7, 0x19],
            DexMethod::AddLiquidity => [0xe8, 0xe3, 0x37, 0x00],
            DexMethod::SwapExactEthForTokens => [0x7f, 0xf3, 0x6a, 0xb5],
            DexMethod::SwapExactTokensForTokens => [0x38, 0xed, 0x17, 0x39],
            DexMethod::SwapTokensForExactTokens => [0x88, 0x03, 0xdb, 0xee],
            DexMethod::SwapExactTokensForEth => [0x18, 0xcb, 0xaf, 0xe5],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DexMethod::AddLiquidityEth => "addLiquidityETH",
            DexMethod::AddLiquidity => "addLiquidity",
            DexMethod::SwapExactEthForTokens => "swapExactETHForTokens",
            DexMethod::SwapExactTokensForTokens => "swapExactTokensForTokens",
            DexMethod::SwapTokensForExactTokens => "swapTokensForExactTokens",
            DexMethod::SwapExactTokensForEth => "swapExactTokensForETH",
        }
    }

    pub fn is_liquidity(&self) -> bool {
        matches!(self, DexMethod::AddLiquidityEth | DexMethod::AddLiquidity)
    }
}

static DEX_METHODS: LazyLock<HashMap<[u8; 4], DexMethod>> =
    LazyLock::new(|| DexMethod::ALL.into_iter().map(|m| (m.selector(), m)).collect());

/// Flag router liquidity and swap calls that carry native value
pub fn detect_dex_call(tx: &TransactionEvent) -> Vec<Alert> {
    if tx.value.is_zero() {
        return vec![];
    }
    let Some(method) = tx.selector().and_then(|s| DEX_METHODS.get(&s).copied()) else {
        return vec![];
    };
    let router = tx.to.map(|a| format!("{:#x}", a)).unwrap_or_default();
    let name = if method.is_liquidity() { "Liquidity added" } else { "DEX swap" };

    vec![Alert::new(
        name,
        format!("{} called on router {} with {} wei", method.name(), router, tx.value),
        DEX_ACTIVITY_ALERT_ID,
        Severity::Info,
        AlertType::Info,
    )
    .with_metadata("method", method.name())
    .with_metadata("selector", format!("0x{}", hex::encode(method.selector())))
    .with_metadata("router", router)
    .with_metadata("sender", format!("{:#x}", tx.from))
    .with_metadata("hash", format!("{:#x}", tx.hash))
    .with_metadata("value", tx.value.to_string())]
}

/// Flag native transfers at or above `threshold` wei
pub fn detect_large_transfer(tx: &TransactionEvent, threshold: U256) -> Vec<Alert> {
    if tx.value.is_zero() || tx.value < threshold {
        return vec![];
    }

    vec![Alert::new(
        "Large native transfer",
        format!("{} wei sent from {:#x}", tx.value, tx.from),
        LARGE_TRANSFER_ALERT_ID,
        Severity::Medium,
        AlertType::Suspicious,
    )
    .with_metadata("from", format!("{:#x}", tx.from))
    .with_metadata("to", tx.to.map(|a| format!("{:#x}", a)).unwrap_or_default())
    .with_metadata("value", tx.value.to_string())
    .with_metadata("hash", format!("{:#x}", tx.hash))
    .with_metadata(
        "addresses",
        tx.addresses()
            .iter()
            .map(|a| format!("{:#x}", a))
            .collect::<Vec<_>>()
            .join(","),
    )]
}

/// Flag blocks without transactions
pub fn detect_empty_block(block: &BlockEvent) -> Vec<Alert> {
    if !block.transactions.is_empty() {
        return vec![];
    }

    vec![Alert::new(
        "Empty block",
        format!("Block {} contains no transactions", block.number),
        EMPTY_BLOCK_ALERT_ID,
        Severity::Low,
        AlertType::Info,
    )
    .with_metadata("blockNumber", block.number.to_string())
    .with_metadata("blockHash", format!("{:#x}", block.hash))]
}

/// The default set of detector units
pub fn builtin_registry(config: &SentinelConfig) -> Result<DetectorRegistry, RegistryError> {
    let threshold = config.large_transfer_wei;

    DetectorRegistry::new(vec![
        DetectorUnit::new("dex-liquidity").with_on_transaction(|tx| async move { Ok(detect_dex_call(&tx)) }),
        DetectorUnit::new("large-transfer")
            .with_initialize(move |_| async move {
                Ok(InitMetadata::from([(
                    "largeTransfer.thresholdWei".to_string(),
                    threshold.to_string(),
                )]))
            })
            .with_on_transaction(move |tx| async move { Ok(detect_large_transfer(&tx, threshold)) }),
        DetectorUnit::new("empty-block").with_on_block(|block| async move { Ok(detect_empty_block(&block)) }),
    ])
}
