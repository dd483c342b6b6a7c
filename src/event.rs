//! Inbound Events
//!
//! Block and transaction descriptors handed to detector units. Events are
//! shared behind `Arc` because detector invocations may outlive the dispatch
//! call that started them.

use std::fmt;
use std::sync::Arc;

use alloy::primitives::{Address, Bytes, TxHash, B256, U256};

/// Which detector capability an event targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Block,
    Transaction,
}

impl EventKind {
    /// Name of the handler invoked for this kind, used in error attribution
    pub fn handler_name(&self) -> &'static str {
        match self {
            EventKind::Block => "onBlock",
            EventKind::Transaction => "onTransaction",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Block => f.write_str("block"),
            EventKind::Transaction => f.write_str("transaction"),
        }
    }
}

/// A new block
#[derive(Debug, Clone, PartialEq)]
pub struct BlockEvent {
    pub number: u64,
    pub hash: B256,
    /// Unix timestamp in seconds
    pub timestamp: u64,
    pub transactions: Vec<TxHash>,
}

/// A log emitted by a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// A transaction included in a block
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionEvent {
    pub hash: TxHash,
    pub from: Address,
    /// Recipient, None for contract creation
    pub to: Option<Address>,
    /// Value in wei
    pub value: U256,
    pub input: Bytes,
    pub block_number: u64,
    /// Unix timestamp in seconds of the including block
    pub timestamp: u64,
    pub logs: Vec<LogEntry>,
}

impl TransactionEvent {
    /// Every address touched by the transaction, deduplicated, in first-seen order
    pub fn addresses(&self) -> Vec<Address> {
        let mut seen = Vec::new();
        let candidates = std::iter::once(self.from)
            .chain(self.to)
            .chain(self.logs.iter().map(|log| log.address));
        for address in candidates {
            if !seen.contains(&address) {
                seen.push(address);
            }
        }
        seen
    }

    /// First 4 bytes of calldata, if present
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.input.get(..4).and_then(|s| s.try_into().ok())
    }
}

/// An event routed through the dispatcher
#[derive(Debug, Clone)]
pub enum Event {
    Block(Arc<BlockEvent>),
    Transaction(Arc<TransactionEvent>),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Block(_) => EventKind::Block,
            Event::Transaction(_) => EventKind::Transaction,
        }
    }

    /// Short identifier for logging: block number or transaction hash
    pub fn id(&self) -> String {
        match self {
            Event::Block(block) => block.number.to_string(),
            Event::Transaction(tx) => format!("{:#x}", tx.hash),
        }
    }
}

impl From<BlockEvent> for Event {
    fn from(block: BlockEvent) -> Self {
        Event::Block(Arc::new(block))
    }
}

impl From<TransactionEvent> for Event {
    fn from(tx: TransactionEvent) -> Self {
        Event::Transaction(Arc::new(tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn tx_with_logs() -> TransactionEvent {
        let router = address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D");
        TransactionEvent {
            hash: TxHash::ZERO,
            from: address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266"),
            to: Some(router),
            value: U256::ZERO,
            input: Bytes::from(vec![0x38, 0xed, 0x17, 0x39, 0x00]),
            block_number: 1,
            timestamp: 0,
            logs: vec![
                LogEntry { address: router, topics: vec![], data: Bytes::new() },
                LogEntry { address: Address::repeat_byte(0x22), topics: vec![], data: Bytes::new() },
            ],
        }
    }

    #[test]
    fn test_handler_names() {
        assert_eq!(EventKind::Block.handler_name(), "onBlock");
        assert_eq!(EventKind::Transaction.handler_name(), "onTransaction");
    }

    #[test]
    fn test_addresses_are_deduplicated() {
        let tx = tx_with_logs();
        let addresses = tx.addresses();
        assert_eq!(addresses.len(), 3);
        assert_eq!(addresses[0], tx.from);
    }

    #[test]
    fn test_selector_extraction() {
        let mut tx = tx_with_logs();
        assert_eq!(tx.selector(), Some([0x38, 0xed, 0x17, 0x39]));

        tx.input = Bytes::from(vec![0x38, 0xed]);
        assert_eq!(tx.selector(), None);
    }

    #[test]
    fn test_event_kind_and_id() {
        let event = Event::from(BlockEvent {
            number: 42,
            hash: B256::ZERO,
            timestamp: 0,
            transactions: vec![],
        });
        assert_eq!(event.kind(), EventKind::Block);
        assert_eq!(event.id(), "42");

        let event = Event::from(tx_with_logs());
        assert_eq!(event.kind(), EventKind::Transaction);
        assert!(event.id().starts_with("0x"));
    }
}
