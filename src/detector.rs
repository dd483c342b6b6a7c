//! Detector Units
//!
//! A detector unit is a named bundle of optional handlers. Which handlers are
//! present decides which events the unit receives: a unit without an
//! `on_block` handler is never invoked for blocks.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::alert::Alert;
use crate::event::{BlockEvent, Event, EventKind, TransactionEvent};

/// Flat metadata returned by an initializer and merged into the launch alert
pub type InitMetadata = HashMap<String, String>;

/// Outcome of a single handler invocation
pub type DetectorResult = anyhow::Result<Vec<Alert>>;

type InitializeFn = Arc<dyn Fn(u64) -> BoxFuture<'static, anyhow::Result<InitMetadata>> + Send + Sync>;
type HandlerFn<E> = Arc<dyn Fn(Arc<E>) -> BoxFuture<'static, DetectorResult> + Send + Sync>;

/// A handler bound to one event, callable once per attempt
pub type Invocation = Box<dyn Fn() -> BoxFuture<'static, DetectorResult> + Send + Sync>;

/// A detector unit descriptor
///
/// Built once at startup and immutable afterwards.
#[derive(Clone)]
pub struct DetectorUnit {
    name: String,
    initialize: Option<InitializeFn>,
    on_block: Option<HandlerFn<BlockEvent>>,
    on_transaction: Option<HandlerFn<TransactionEvent>>,
}

impl DetectorUnit {
    /// Create a unit with no capabilities
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initialize: None,
            on_block: None,
            on_transaction: None,
        }
    }

    /// Attach a one-shot initializer, called with the starting block number
    pub fn with_initialize<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(u64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<InitMetadata>> + Send + 'static,
    {
        self.initialize = Some(Arc::new(move |start_block| f(start_block).boxed()));
        self
    }

    /// Attach a block handler
    pub fn with_on_block<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<BlockEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DetectorResult> + Send + 'static,
    {
        self.on_block = Some(Arc::new(move |block| f(block).boxed()));
        self
    }

    /// Attach a transaction handler
    pub fn with_on_transaction<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<TransactionEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DetectorResult> + Send + 'static,
    {
        self.on_transaction = Some(Arc::new(move |tx| f(tx).boxed()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_initialize(&self) -> bool {
        self.initialize.is_some()
    }

    /// Whether the unit exposes the handler for `kind`
    pub fn handles(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Block => self.on_block.is_some(),
            EventKind::Transaction => self.on_transaction.is_some(),
        }
    }

    /// Run the initializer, if any. Units without one contribute no metadata.
    pub async fn initialize(&self, start_block: u64) -> anyhow::Result<InitMetadata> {
        match &self.initialize {
            Some(init) => init(start_block).await,
            None => Ok(InitMetadata::new()),
        }
    }

    /// Bind the matching handler to `event`
    ///
    /// The returned invocation can be called repeatedly, once per attempt.
    /// Returns `None` when the unit lacks the matching capability.
    pub fn invocation(&self, event: &Event) -> Option<Invocation> {
        match event {
            Event::Block(block) => {
                let handler = Arc::clone(self.on_block.as_ref()?);
                let block = Arc::clone(block);
                Some(Box::new(move || handler(Arc::clone(&block))))
            }
            Event::Transaction(tx) => {
                let handler = Arc::clone(self.on_transaction.as_ref()?);
                let tx = Arc::clone(tx);
                Some(Box::new(move || handler(Arc::clone(&tx))))
            }
        }
    }
}

impl fmt::Debug for DetectorUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectorUnit")
            .field("name", &self.name)
            .field("initialize", &self.initialize.is_some())
            .field("on_block", &self.on_block.is_some())
            .field("on_transaction", &self.on_transaction.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertType, Severity};
    use alloy::primitives::B256;

    fn block() -> Event {
        Event::from(BlockEvent {
            number: 7,
            hash: B256::ZERO,
            timestamp: 0,
            transactions: vec![],
        })
    }

    #[test]
    fn test_capabilities_follow_handlers() {
        let unit = DetectorUnit::new("blocks-only").with_on_block(|_| async { Ok(vec![]) });

        assert!(unit.handles(EventKind::Block));
        assert!(!unit.handles(EventKind::Transaction));
        assert!(!unit.has_initialize());
    }

    #[tokio::test]
    async fn test_invocation_passes_event() {
        let unit = DetectorUnit::new("echo").with_on_block(|block| async move {
            Ok(vec![Alert::new(
                "seen",
                block.number.to_string(),
                "ECHO",
                Severity::Info,
                AlertType::Info,
            )])
        });

        let invocation = unit.invocation(&block()).unwrap();
        let first = invocation().await.unwrap();
        let second = invocation().await.unwrap();
        assert_eq!(first[0].description, "7");
        assert_eq!(first, second);
    }

    #[test]
    fn test_invocation_without_capability_is_none() {
        let unit = DetectorUnit::new("tx-only").with_on_transaction(|_| async { Ok(vec![]) });
        assert!(unit.invocation(&block()).is_none());
    }

    #[tokio::test]
    async fn test_initialize_defaults_to_empty_metadata() {
        let unit = DetectorUnit::new("plain");
        assert!(unit.initialize(100).await.unwrap().is_empty());

        let unit = DetectorUnit::new("with-init").with_initialize(|start| async move {
            Ok(InitMetadata::from([("start".to_string(), start.to_string())]))
        });
        assert_eq!(unit.initialize(100).await.unwrap()["start"], "100");
    }

    #[test]
    fn test_debug_shows_capabilities() {
        let unit = DetectorUnit::new("dbg").with_on_transaction(|_| async { Ok(vec![]) });
        let rendered = format!("{:?}", unit);
        assert!(rendered.contains("on_transaction: true"));
        assert!(rendered.contains("on_block: false"));
    }
}
