//! Caselake Collector Service
//!
//! Keeps the lake synchronized with the case-management provider:
//! 1. Cold start: the lifecycle owner runs a one-shot backfill via the CLI
//! 2. Service mode: consumes sync trigger messages (daily timer, provider
//!    change-events) from the trigger queue
//! 3. Each run fetches, normalizes, and writes entities idempotently and
//!    emits an object-written event per durable write

mod errors;
mod normalize;
mod provider;
mod sync;

use crate::provider::HttpSupportProvider;
use crate::sync::{route_trigger, Collector, Selection, SyncMode};
use caselake_common::{
    config::AppConfig,
    lake::FsObjectStore,
    metrics,
    queue::{Queue, QueueConfig, SyncTriggerMessage},
    VERSION,
};
use std::sync::Arc;
use tracing::{error, info, warn, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting Caselake Collector v{}", VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    let config = Arc::new(config);

    metrics::register_metrics();

    // Wire up capabilities: the collector gets a writable lake handle,
    // the provider client, and (optionally) the object-event queue
    let lake = Arc::new(FsObjectStore::new(&config.lake.root));
    let provider = Arc::new(HttpSupportProvider::new(&config.provider)?);

    let events = match &config.queue.object_event_queue_url {
        Some(url) => {
            info!(url = %url, "Connecting to object-event queue...");
            let queue_config = QueueConfig {
                url: url.clone(),
                dlq_url: config.queue.dlq_url.clone(),
                ..Default::default()
            };
            Some(Arc::new(Queue::new(queue_config).await?))
        }
        None => {
            warn!("Object-event queue not configured, metadata extraction will not be triggered");
            None
        }
    };

    let collector = Collector::new(provider, lake, events);

    // One-shot mode: `collector backfill [days]`
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1] == "backfill" {
        let days_back = args
            .get(2)
            .map(|d| d.parse::<i64>())
            .transpose()?
            .unwrap_or(180);

        info!(days_back, "Running one-shot backfill...");
        let report = collector
            .run(
                SyncMode::Backfill { days_back },
                Selection { case: true, health: true, ta: true },
            )
            .await?;

        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    // Service mode: poll the trigger queue
    let trigger_queue = match &config.queue.trigger_queue_url {
        Some(url) => {
            info!(url = %url, "Connecting to trigger queue...");
            let queue_config = QueueConfig {
                url: url.clone(),
                dlq_url: config.queue.dlq_url.clone(),
                ..Default::default()
            };
            Queue::new(queue_config).await?
        }
        None => {
            warn!("Trigger queue not configured, waiting for shutdown signal...");
            tokio::signal::ctrl_c().await?;
            info!("Collector shutting down");
            return Ok(());
        }
    };

    info!("Collector ready, polling trigger queue...");

    // Circuit breaker state
    let mut consecutive_failures = 0u32;
    const MAX_FAILURES: u32 = 5;
    const CIRCUIT_BREAK_DURATION: std::time::Duration = std::time::Duration::from_secs(30);

    loop {
        if consecutive_failures >= MAX_FAILURES {
            warn!(failures = consecutive_failures, "Circuit breaker open, pausing...");
            tokio::time::sleep(CIRCUIT_BREAK_DURATION).await;
            consecutive_failures = 0;
            info!("Circuit breaker reset, resuming...");
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            result = trigger_queue.receive_parsed::<SyncTriggerMessage>() => {
                match result {
                    Ok(messages) => {
                        for (trigger, receipt_handle) in messages {
                            let (mode, selection) = route_trigger(&trigger);
                            info!(mode = mode.name(), "Received sync trigger");

                            match collector.run(mode, selection).await {
                                Ok(report) => {
                                    consecutive_failures = 0;
                                    info!(
                                        written = report.written_total(),
                                        failed = report.failed_total(),
                                        "Sync trigger handled"
                                    );
                                    if let Err(e) = trigger_queue.delete(&receipt_handle).await {
                                        error!(error = %e, "Failed to delete trigger message");
                                    }
                                }
                                Err(e) => {
                                    consecutive_failures += 1;
                                    error!(
                                        error = %e,
                                        failures = consecutive_failures,
                                        "Sync run failed"
                                    );
                                    // Message will be re-delivered or moved to DLQ
                                }
                            }
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(error = %e, "Failed to receive trigger messages");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }

    info!("Collector shutting down");
    Ok(())
}
