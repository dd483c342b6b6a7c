//! Build Metadata Enrichment
//!
//! Every alert leaving the dispatcher is stamped with the commit it was built
//! from, and the launch alert additionally carries the commit message.

use crate::alert::{Alert, AlertType, Severity, LAUNCH_ALERT_ID};
use crate::detector::InitMetadata;

/// Metadata key stamped on every outgoing alert
pub const COMMIT_HASH_KEY: &str = "version.commitHash";

/// Metadata key carried by the launch alert
pub const COMMIT_MESSAGE_KEY: &str = "version.commitMessage";

const UNKNOWN: &str = "unknown";

/// Build identifiers of the running binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub commit_hash: String,
    pub commit_message: String,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self::compiled()
    }
}

impl BuildInfo {
    pub fn new(commit_hash: impl Into<String>, commit_message: impl Into<String>) -> Self {
        Self {
            commit_hash: commit_hash.into(),
            commit_message: commit_message.into(),
        }
    }

    /// Identifiers baked in at compile time via `TXNSCOPE_COMMIT_HASH` and
    /// `TXNSCOPE_COMMIT_MESSAGE`, or "unknown"
    pub fn compiled() -> Self {
        Self::new(
            option_env!("TXNSCOPE_COMMIT_HASH").unwrap_or(UNKNOWN),
            option_env!("TXNSCOPE_COMMIT_MESSAGE").unwrap_or(UNKNOWN),
        )
    }

    /// Stamp the commit hash onto each alert in place
    pub fn enrich(&self, alerts: &mut [Alert]) {
        for alert in alerts {
            alert
                .metadata
                .insert(COMMIT_HASH_KEY.to_string(), self.commit_hash.clone());
        }
    }

    /// The one-shot alert announcing that the process started
    pub fn launch_alert(&self, start_block: u64, init_metadata: InitMetadata) -> Alert {
        let mut alert = Alert::new(
            "Bot launched",
            format!("Detectors started at block {}", start_block),
            LAUNCH_ALERT_ID,
            Severity::Info,
            AlertType::Info,
        );
        alert.metadata = init_metadata;
        alert
            .with_metadata("startBlock", start_block.to_string())
            .with_metadata(COMMIT_HASH_KEY, self.commit_hash.clone())
            .with_metadata(COMMIT_MESSAGE_KEY, self.commit_message.clone())
    }
}
