//! Alert Records
//!
//! The structured output unit emitted by detector units and by the dispatcher
//! itself. Alerts are serialized as JSON for delivery to downstream consumers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Alert id used for the synthetic record produced when a detector exhausts its retries
pub const DETECTOR_ERROR_ALERT_ID: &str = "TXNSCOPE-DETECTOR-ERROR";

/// Alert id used for the one-shot launch record
pub const LAUNCH_ALERT_ID: &str = "TXNSCOPE-LAUNCHED";

/// How urgent an alert is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Severity {
    #[default]
    Unknown,
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// What kind of situation an alert describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AlertType {
    #[default]
    Unknown,
    Info,
    Suspicious,
    Degraded,
    Exploit,
}

/// A single alert record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Human-readable title
    pub name: String,
    /// Human-readable details
    pub description: String,
    /// Stable machine-readable category (e.g. "TXNSCOPE-LARGE-TRANSFER")
    pub alert_id: String,
    pub severity: Severity,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    /// Free-form string metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Alert {
    /// Create an alert with empty metadata
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        alert_id: impl Into<String>,
        severity: Severity,
        alert_type: AlertType,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            alert_id: alert_id.into(),
            severity,
            alert_type,
            metadata: HashMap::new(),
        }
    }

    /// Add a metadata entry, replacing any previous value for the key
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Look up a metadata value
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Serialize the alert to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize an alert from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Alert {
        Alert::new(
            "Large transfer",
            "10 ETH moved",
            "TXNSCOPE-LARGE-TRANSFER",
            Severity::Medium,
            AlertType::Suspicious,
        )
        .with_metadata("value", "10000000000000000000")
    }

    #[test]
    fn test_alert_json_uses_camel_case_and_type_key() {
        let json = sample().to_json().unwrap();

        assert!(json.contains("\"alertId\""));
        assert!(json.contains("\"type\":\"Suspicious\""));
        assert!(json.contains("\"severity\":\"Medium\""));
        assert!(!json.contains("alert_type"));
    }

    #[test]
    fn test_alert_from_json_without_metadata() {
        let json = r#"{
            "name": "Bot launched",
            "description": "",
            "alertId": "TXNSCOPE-LAUNCHED",
            "severity": "Info",
            "type": "Info"
        }"#;

        let alert = Alert::from_json(json).unwrap();
        assert_eq!(alert.alert_id, LAUNCH_ALERT_ID);
        assert_eq!(alert.severity, Severity::Info);
        assert!(alert.metadata.is_empty());
    }

    #[test]
    fn test_with_metadata_overwrites() {
        let alert = sample().with_metadata("value", "1");
        assert_eq!(alert.metadata_value("value"), Some("1"));
        assert_eq!(alert.metadata.len(), 1);
    }

    #[test]
    fn test_defaults_are_unknown() {
        assert_eq!(Severity::default(), Severity::Unknown);
        assert_eq!(AlertType::default(), AlertType::Unknown);
    }
}
