//! Detector Registry
//!
//! Ordered, read-only collection of the detector units known to the process.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use crate::detector::{DetectorUnit, InitMetadata};
use crate::event::EventKind;

/// Errors raised while building or initializing the registry
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Duplicate detector unit name: {0}")]
    DuplicateName(String),

    #[error("Failed to initialize detector unit {unit}: {source}")]
    Initialize {
        unit: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Registry of detector units
#[derive(Debug, Clone, Default)]
pub struct DetectorRegistry {
    units: Vec<Arc<DetectorUnit>>,
}

impl DetectorRegistry {
    /// Build a registry, preserving the given order
    ///
    /// Unit names must be unique since they identify the unit in error alerts.
    pub fn new(units: Vec<DetectorUnit>) -> Result<Self, RegistryError> {
        let mut names = HashSet::new();
        for unit in &units {
            if !names.insert(unit.name().to_string()) {
                return Err(RegistryError::DuplicateName(unit.name().to_string()));
            }
        }

        Ok(Self {
            units: units.into_iter().map(Arc::new).collect(),
        })
    }

    /// An empty registry, which yields no alerts
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// All units in registry order
    pub fn units(&self) -> impl Iterator<Item = &Arc<DetectorUnit>> {
        self.units.iter()
    }

    /// Units exposing the handler for `kind`, in registry order
    pub fn for_kind(&self, kind: EventKind) -> impl Iterator<Item = &Arc<DetectorUnit>> {
        self.units.iter().filter(move |unit| unit.handles(kind))
    }

    /// Run every initializer once and merge the returned metadata
    ///
    /// Initializers run in registry order. The first failure aborts
    /// initialization; later keys overwrite earlier ones on collision.
    pub async fn initialize_all(&self, start_block: u64) -> Result<InitMetadata, RegistryError> {
        let mut merged = InitMetadata::new();

        for unit in self.units.iter().filter(|unit| unit.has_initialize()) {
            match unit.initialize(start_block).await {
                Ok(metadata) => {
                    info!(unit = unit.name(), keys = metadata.len(), "initialized detector unit");
                    merged.extend(metadata);
                }
                Err(e) => {
                    error!(unit = unit.name(), error = %e, "detector unit failed to initialize");
                    return Err(RegistryError::Initialize {
                        unit: unit.name().to_string(),
                        source: e,
                    });
                }
            }
        }

        Ok(merged)
    }
}
