//! Detector Dispatcher
//!
//! Fans each inbound event out to every detector unit that handles it, waits
//! at most the timeout budget, and returns whatever alerts have accumulated.
//!
//! Invocations still running when the budget elapses are not cancelled. They
//! keep running as detached tasks and append to the same per-kind result
//! buffer, so their alerts are returned by the next dispatch of that kind,
//! even though that dispatch concerns a different block or transaction.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::alert::Alert;
use crate::buffer::{LaunchBuffer, ResultBuffer};
use crate::config::SentinelConfig;
use crate::enrichment::BuildInfo;
use crate::event::{BlockEvent, Event, EventKind, TransactionEvent};
use crate::registry::{DetectorRegistry, RegistryError};
use crate::retry::RetryPolicy;

/// Runs detector units for inbound events
pub struct Dispatcher {
    registry: DetectorRegistry,
    retry: RetryPolicy,
    build: Arc<BuildInfo>,
    timeout: Duration,
    block_results: Arc<ResultBuffer>,
    transaction_results: Arc<ResultBuffer>,
    launch: LaunchBuffer,
}

impl Dispatcher {
    pub fn new(
        registry: DetectorRegistry,
        retry: RetryPolicy,
        build: BuildInfo,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            retry,
            build: Arc::new(build),
            timeout,
            block_results: Arc::new(ResultBuffer::new()),
            transaction_results: Arc::new(ResultBuffer::new()),
            launch: LaunchBuffer::new(),
        }
    }

    /// Create a dispatcher using the tunables and build info from `config`
    pub fn from_config(registry: DetectorRegistry, config: &SentinelConfig) -> Self {
        Self::new(
            registry,
            RetryPolicy::new(config.max_retries),
            config.build_info(),
            config.timeout(),
        )
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    /// Initialize every detector unit and queue the launch alert
    ///
    /// Any initializer failure is returned and should end the process: a
    /// unit that could not establish its starting state must not run.
    pub async fn initialize(&self, start_block: u64) -> Result<(), RegistryError> {
        let metadata = self.registry.initialize_all(start_block).await?;

        let mut launch = vec![self.build.launch_alert(start_block, metadata)];
        self.build.enrich(&mut launch);
        self.launch.store(launch);

        info!(
            start_block,
            units = self.registry.len(),
            commit = %self.build.commit_hash,
            "dispatcher initialized"
        );
        Ok(())
    }

    /// Number of alerts waiting for the next dispatch of `kind`
    pub fn pending(&self, kind: EventKind) -> usize {
        self.results(kind).len()
    }

    fn results(&self, kind: EventKind) -> &Arc<ResultBuffer> {
        match kind {
            EventKind::Block => &self.block_results,
            EventKind::Transaction => &self.transaction_results,
        }
    }

    pub async fn handle_block(&self, block: BlockEvent) -> Vec<Alert> {
        self.dispatch(Event::from(block)).await
    }

    pub async fn handle_transaction(&self, tx: TransactionEvent) -> Vec<Alert> {
        self.dispatch(Event::from(tx)).await
    }

    /// Run one round of detectors for `event`
    ///
    /// Returns within the timeout budget. The result holds every alert
    /// queued for this event kind at that moment, which may include alerts
    /// from earlier events and may miss alerts from this one.
    #[instrument(skip_all, fields(kind = %event.kind(), event = %event.id()))]
    pub async fn dispatch(&self, event: Event) -> Vec<Alert> {
        let kind = event.kind();
        let results = self.results(kind);

        if kind == EventKind::Block {
            if let Some(launch) = self.launch.take() {
                debug!(count = launch.len(), "releasing launch alerts");
                results.append(launch);
            }
        }

        let started = Instant::now();
        let mut handles = self.spawn_invocations(&event, results);
        let spawned = handles.len();

        let completed = timeout(self.timeout, join_all(handles.iter_mut())).await;
        match completed {
            Ok(outcomes) => {
                for outcome in outcomes {
                    if let Err(e) = outcome {
                        error!(error = %e, "detector task did not complete");
                    }
                }
            }
            Err(_) => {
                let still_running = handles.iter().filter(|h| !h.is_finished()).count();
                warn!(
                    budget_ms = self.timeout.as_millis() as u64,
                    still_running,
                    spawned,
                    "dispatch budget elapsed, late alerts carry over to the next dispatch"
                );
            }
        }
        // Dropping the handles detaches any task that is still running.
        drop(handles);

        let alerts = results.drain();
        debug!(
            spawned,
            returned = alerts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dispatch complete"
        );
        alerts
    }

    fn spawn_invocations(&self, event: &Event, results: &Arc<ResultBuffer>) -> Vec<JoinHandle<()>> {
        let kind = event.kind();

        self.registry
            .for_kind(kind)
            .filter_map(|unit| {
                let invocation = unit.invocation(event)?;
                let name = unit.name().to_string();
                let retry = self.retry;
                let build = Arc::clone(&self.build);
                let results = Arc::clone(results);

                Some(tokio::spawn(async move {
                    let mut alerts = retry.run(&name, kind, || invocation()).await;
                    build.enrich(&mut alerts);
                    debug!(unit = %name, count = alerts.len(), "detector finished");
                    results.append(alerts);
                }))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertType, Severity, DETECTOR_ERROR_ALERT_ID, LAUNCH_ALERT_ID};
    use crate::detector::{DetectorUnit, InitMetadata};
    use crate::enrichment::COMMIT_HASH_KEY;
    use alloy::primitives::B256;

    fn block(number: u64) -> BlockEvent {
        BlockEvent {
            number,
            hash: B256::ZERO,
            timestamp: 0,
            transactions: vec![],
        }
    }

    fn alert(name: &str) -> Alert {
        Alert::new(name, "", "TEST", Severity::Info, AlertType::Info)
    }

    fn dispatcher(units: Vec<DetectorUnit>, budget: Duration) -> Dispatcher {
        Dispatcher::new(
            DetectorRegistry::new(units).unwrap(),
            RetryPolicy::new(5),
            BuildInfo::new("abc123", "test build"),
            budget,
        )
    }

    #[tokio::test]
    async fn test_empty_registry_returns_nothing() {
        let d = dispatcher(vec![], Duration::from_secs(5));
        assert!(d.handle_block(block(1)).await.is_empty());
    }

    #[tokio::test]
    async fn test_alerts_are_enriched() {
        let d = dispatcher(
            vec![DetectorUnit::new("one").with_on_block(|_| async { Ok(vec![alert("hit")]) })],
            Duration::from_secs(5),
        );

        let alerts = d.handle_block(block(1)).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metadata_value(COMMIT_HASH_KEY), Some("abc123"));
    }

    #[tokio::test]
    async fn test_launch_alert_released_once_on_first_block() {
        let d = dispatcher(
            vec![DetectorUnit::new("init").with_initialize(|_| async {
                Ok(InitMetadata::from([("ready".to_string(), "yes".to_string())]))
            })],
            Duration::from_secs(5),
        );
        tokio_test::assert_ok!(d.initialize(100).await);

        let first = d.handle_block(block(101)).await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].alert_id, LAUNCH_ALERT_ID);
        assert_eq!(first[0].metadata_value("ready"), Some("yes"));
        assert_eq!(first[0].metadata_value(COMMIT_HASH_KEY), Some("abc123"));

        for n in 102..110 {
            assert!(d.handle_block(block(n)).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_failed_initialize_is_reported() {
        let d = dispatcher(
            vec![DetectorUnit::new("bad").with_initialize(|_| async { Err(anyhow::anyhow!("no state")) })],
            Duration::from_secs(5),
        );

        tokio_test::assert_err!(d.initialize(1).await);
        assert!(d.handle_block(block(2)).await.is_empty());
    }

    #[tokio::test]
    async fn test_only_capable_units_run() {
        let d = dispatcher(
            vec![
                DetectorUnit::new("blocks").with_on_block(|_| async { Ok(vec![alert("block")]) }),
                DetectorUnit::new("txs").with_on_transaction(|_| async { Ok(vec![alert("tx")]) }),
            ],
            Duration::from_secs(5),
        );

        let alerts = d.handle_block(block(1)).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].name, "block");
    }

    #[tokio::test]
    async fn test_broken_unit_becomes_error_alert() {
        let d = dispatcher(
            vec![DetectorUnit::new("broken").with_on_block(|_| async { Err(anyhow::anyhow!("bad abi")) })],
            Duration::from_secs(5),
        );

        let alerts = d.handle_block(block(1)).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_id, DETECTOR_ERROR_ALERT_ID);
        assert_eq!(alerts[0].name, "Error in broken.onBlock");
        assert_eq!(alerts[0].metadata_value(COMMIT_HASH_KEY), Some("abc123"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_unit_carries_over_to_next_dispatch() {
        let d = dispatcher(
            vec![DetectorUnit::new("slow").with_on_block(|block| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(vec![alert(&format!("late-{}", block.number))])
            })],
            Duration::from_secs(5),
        );

        let first = d.handle_block(block(1)).await;
        assert!(first.is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(d.pending(EventKind::Block), 1);

        // Block 2's own invocation times out too; only block 1's alert is returned.
        let second = d.handle_block(block(2)).await;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].name, "late-1");
    }
}
