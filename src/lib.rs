//! TxnScope Sentinel Library
//!
//! This crate runs detector units against every new block and transaction,
//! dispatching them concurrently within a fixed time budget and delivering
//! their alerts, enriched with build metadata, to Redis.

pub mod alert;
pub mod buffer;
pub mod config;
pub mod detector;
pub mod detectors;
pub mod dispatcher;
pub mod enrichment;
pub mod event;
pub mod ipc;
pub mod publisher;
pub mod registry;
pub mod retry;

// Re-export commonly used types
pub use alert::{Alert, AlertType, Severity};
pub use config::SentinelConfig;
pub use detector::{DetectorUnit, InitMetadata};
pub use dispatcher::Dispatcher;
pub use enrichment::BuildInfo;
pub use event::{BlockEvent, Event, EventKind, LogEntry, TransactionEvent};
pub use registry::DetectorRegistry;
pub use retry::RetryPolicy;
