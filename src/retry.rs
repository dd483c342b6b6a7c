//! Retry Policy
//!
//! Immediate, bounded retries around a single detector invocation. There is
//! no delay between attempts; network-level retries belong to the RPC client.

use std::any::Any;
use std::backtrace::BacktraceStatus;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{error, warn};

use crate::alert::{Alert, AlertType, Severity, DETECTOR_ERROR_ALERT_ID};
use crate::event::EventKind;

/// Default number of attempts per invocation
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Bounded immediate retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy {
    /// Create a policy making `max_retries` attempts (at least one)
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `op` until it succeeds or attempts run out
    ///
    /// Never fails: on exhaustion the last error becomes a single error alert
    /// attributed to `unit`. A panicking attempt counts as a failed one.
    pub async fn run<F, Fut>(&self, unit: &str, kind: EventKind, mut op: F) -> Vec<Alert>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<Alert>>>,
    {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            // Building the future may itself panic, so the call happens inside the guard.
            let outcome = match AssertUnwindSafe(async { op().await }).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(anyhow::anyhow!("detector panicked: {}", panic_message(&*payload))),
            };

            match outcome {
                Ok(alerts) => return alerts,
                Err(e) => {
                    warn!(
                        unit,
                        handler = kind.handler_name(),
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "detector invocation failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        let e = last_error.unwrap_or_else(|| anyhow::anyhow!("no attempts made"));
        error!(unit, handler = kind.handler_name(), error = %e, "detector retries exhausted");
        vec![error_alert(unit, kind, &e, self.max_retries)]
    }
}

/// Build the synthetic alert reporting an exhausted detector
pub fn error_alert(unit: &str, kind: EventKind, e: &anyhow::Error, attempts: u32) -> Alert {
    Alert::new(
        format!("Error in {}.{}", unit, kind.handler_name()),
        e.to_string(),
        DETECTOR_ERROR_ALERT_ID,
        Severity::High,
        AlertType::Degraded,
    )
    .with_metadata("stack", stack_trace(e))
    .with_metadata("attempts", attempts.to_string())
}

/// Render `e` for the `stack` metadata field
///
/// Lists the error and every cause beneath it. anyhow only records a
/// backtrace when `RUST_LIB_BACKTRACE=1` (or `RUST_BACKTRACE=1`) is set; when
/// one was captured it is appended after the causes.
pub fn stack_trace(e: &anyhow::Error) -> String {
    let mut stack = String::new();
    for (depth, cause) in e.chain().enumerate() {
        if depth == 0 {
            stack.push_str(&cause.to_string());
        } else {
            stack.push_str(&format!("\ncaused by: {}", cause));
        }
    }

    let backtrace = e.backtrace();
    if backtrace.status() == BacktraceStatus::Captured {
        stack.push_str("\n\nstack backtrace:\n");
        stack.push_str(&backtrace.to_string());
    }
    stack
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn ok_alert() -> Alert {
        Alert::new("ok", "", "OK", Severity::Info, AlertType::Info)
    }

    #[test]
    fn test_zero_retries_clamps_to_one() {
        assert_eq!(RetryPolicy::new(0).max_retries(), 1);
        assert_eq!(RetryPolicy::default().max_retries(), DEFAULT_MAX_RETRIES);
    }

    #[tokio::test]
    async fn test_first_success_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let alerts = RetryPolicy::new(5)
            .run("unit", EventKind::Block, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(vec![ok_alert()]) }
            })
            .await;

        assert_eq!(alerts, vec![ok_alert()]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_on_last_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let alerts = RetryPolicy::new(3)
            .run("flaky", EventKind::Transaction, || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(anyhow::anyhow!("attempt {n} failed"))
                    } else {
                        Ok(vec![ok_alert()])
                    }
                }
            })
            .await;

        assert_eq!(alerts, vec![ok_alert()]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_yields_single_error_alert() {
        for max_retries in [1, 2, 5, 10] {
            let calls = Arc::new(AtomicU32::new(0));
            let counter = Arc::clone(&calls);

            let alerts = RetryPolicy::new(max_retries)
                .run("broken", EventKind::Transaction, || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(anyhow::anyhow!("boom")) }
                })
                .await;

            assert_eq!(alerts.len(), 1);
            assert_eq!(calls.load(Ordering::SeqCst), max_retries);

            let alert = &alerts[0];
            assert_eq!(alert.name, "Error in broken.onTransaction");
            assert_eq!(alert.alert_id, DETECTOR_ERROR_ALERT_ID);
            assert_eq!(alert.severity, Severity::High);
            assert_eq!(alert.alert_type, AlertType::Degraded);
            assert_eq!(alert.description, "boom");
            assert!(alert.metadata_value("stack").unwrap().contains("boom"));
        }
    }

    #[tokio::test]
    async fn test_panic_counts_as_failure() {
        let alerts = RetryPolicy::new(2)
            .run("panicky", EventKind::Block, || async {
                if true {
                    panic!("index out of range");
                }
                Ok(vec![])
            })
            .await;

        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].description.contains("index out of range"));
    }

    #[tokio::test]
    async fn test_panic_while_building_future_counts_as_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let empty: Vec<u64> = vec![];

        let alerts = RetryPolicy::new(3)
            .run("eager", EventKind::Block, || {
                counter.fetch_add(1, Ordering::SeqCst);
                let first = empty[0];
                async move { Ok(vec![ok_alert().with_metadata("first", first.to_string())]) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].name, "Error in eager.onBlock");
        assert!(alerts[0].description.contains("index out of bounds"));
    }

    #[test]
    fn test_stack_lists_every_cause() {
        let e = anyhow::anyhow!("socket closed").context("fetch pool reserves");
        let stack = stack_trace(&e);

        let mut lines = stack.lines();
        assert_eq!(lines.next(), Some("fetch pool reserves"));
        assert_eq!(lines.next(), Some("caused by: socket closed"));

        let alert = error_alert("pool", EventKind::Transaction, &e, 5);
        assert_eq!(alert.metadata_value("stack"), Some(stack.as_str()));
        assert_eq!(alert.metadata_value("attempts"), Some("5"));
    }
}
