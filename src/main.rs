//! TxnScope Sentinel
//!
//! Follows the chain over IPC, runs the built-in detector units for every
//! transaction and block, and publishes their alerts to Redis.

use std::process::ExitCode;

use alloy::providers::Provider;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use txnscope_sentinel::detectors::builtin_registry;
use txnscope_sentinel::ipc::{resolve_socket, BlockSource, IpcConnection, ReconnectPolicy};
use txnscope_sentinel::publisher::AlertPublisher;
use txnscope_sentinel::{Alert, Dispatcher, SentinelConfig};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "sentinel stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = SentinelConfig::from_env()?;

    let mut connection = IpcConnection::new(
        resolve_socket(&config.ipc_path),
        ReconnectPolicy::default().with_max_attempts(config.max_reconnects),
    );
    let provider = match connection.connect().await {
        Ok(provider) => provider,
        Err(e) => {
            warn!(error = %e, "initial IPC connection failed");
            connection.reconnect().await?
        }
    };

    let mut publisher = AlertPublisher::connect(&config.redis_url, config.channel.clone()).await?;
    info!(channel = publisher.channel(), "publishing alerts");

    let dispatcher = Dispatcher::from_config(builtin_registry(&config)?, &config);
    for unit in dispatcher.registry().units() {
        info!(unit = unit.name(), "registered detector unit");
    }
    let start_block = provider.get_block_number().await?;
    dispatcher.initialize(start_block).await?;

    let mut source = BlockSource::new(provider, start_block + 1, config.poll_interval())
        .with_max_rpc_failures(config.max_rpc_failures);
    info!(
        start_block,
        timeout_ms = config.timeout_ms,
        max_retries = config.max_retries,
        "sentinel running"
    );

    loop {
        let events = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                return Ok(());
            }
            next = source.next() => next,
        };

        let events = match events {
            Ok(events) => events,
            Err(e) if e.is_transport() => {
                warn!(error = %e, block = source.next_block(), "lost node connection");
                source.set_provider(connection.reconnect().await?);
                continue;
            }
            Err(e) => {
                error!(error = %e, block = source.next_block(), "node keeps rejecting block requests");
                return Err(e.into());
            }
        };

        for tx in events.transactions {
            let alerts = dispatcher.handle_transaction(tx).await;
            deliver(&mut publisher, &alerts).await;
        }
        let alerts = dispatcher.handle_block(events.block).await;
        deliver(&mut publisher, &alerts).await;
    }
}

async fn deliver(publisher: &mut AlertPublisher, alerts: &[Alert]) {
    if alerts.is_empty() {
        return;
    }
    if let Err(e) = publisher.publish_all(alerts).await {
        error!(error = %e, count = alerts.len(), "failed to publish alerts");
    }
}
