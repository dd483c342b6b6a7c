//! Result Buffers
//!
//! Shared queues of alerts that have been produced but not yet delivered.
//! Detector invocations append whenever they finish; the dispatcher drains
//! once per inbound event. Alerts that arrive after a drain are picked up by
//! the next one.

use std::mem;
use std::sync::{Mutex, MutexGuard};

use crate::alert::Alert;

/// Append/drain queue of alerts
#[derive(Debug, Default)]
pub struct ResultBuffer {
    alerts: Mutex<Vec<Alert>>,
}

impl ResultBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    // The Vec is never left half-updated, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Vec<Alert>> {
        self.alerts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add alerts to the tail, keeping them contiguous
    pub fn append(&self, alerts: impl IntoIterator<Item = Alert>) {
        self.lock().extend(alerts);
    }

    /// Remove and return everything currently queued
    pub fn drain(&self) -> Vec<Alert> {
        mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Holds startup alerts until the first block dispatch takes them
#[derive(Debug, Default)]
pub struct LaunchBuffer {
    alerts: Mutex<Option<Vec<Alert>>>,
}

impl LaunchBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the startup alerts, replacing anything not yet taken
    pub fn store(&self, alerts: Vec<Alert>) {
        *self.alerts.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(alerts);
    }

    /// Take the startup alerts; every later call returns `None`
    pub fn take(&self) -> Option<Vec<Alert>> {
        self.alerts.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take()
    }
}
