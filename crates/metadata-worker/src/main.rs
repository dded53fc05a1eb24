//! Caselake Metadata Worker
//!
//! Processes object-written events from the collector:
//! 1. Receives the event from the object-event queue
//! 2. Reads the lake object and derives its flat metadata row
//! 3. Upserts the row into the metadata table keyed by object key
//! 4. Requests a best-effort knowledge index refresh per processed batch

mod extractor;

use crate::extractor::{IndexRefreshClient, MetadataExtractor};
use caselake_common::{
    config::AppConfig,
    db::{DbPool, MetadataRepository},
    lake::FsObjectStore,
    metrics,
    queue::{ObjectWrittenEvent, Queue, QueueConfig},
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

    info!("Starting Caselake Metadata Worker v{}", VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    let config = Arc::new(config);

    metrics::register_metrics();

    // Initialize database connection and schema
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    let repository = MetadataRepository::new(db);
    repository.ensure_schema().await?;

    // The extractor only needs a readable lake handle
    let lake = Arc::new(FsObjectStore::new(&config.lake.root));
    let extractor = MetadataExtractor::new(lake, repository);

    let refresh = IndexRefreshClient::new(&config.knowledge.base_url, config.knowledge.timeout_secs)?;

    // Initialize object-event queue
    let event_queue = match &config.queue.object_event_queue_url {
        Some(url) => {
            info!(url = %url, "Connecting to object-event queue...");
            let queue_config = QueueConfig {
                url: url.clone(),
                dlq_url: config.queue.dlq_url.clone(),
                ..Default::default()
            };
            Queue::new(queue_config).await?
        }
        None => {
            warn!("Object-event queue not configured, waiting for shutdown signal...");
            tokio::signal::ctrl_c().await?;
            info!("Metadata worker shutting down");
            return Ok(());
        }
    };

    info!("Metadata worker ready, starting queue polling...");

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
            result = event_queue.receive_parsed::<ObjectWrittenEvent>() => {
                match result {
                    Ok(messages) => {
                        let mut batch_upserts = 0usize;
                        for (event, receipt_handle) in messages {
                            info!(key = %event.object_key, "Received object-written event");

                            match extractor.extract(&event).await {
                                Ok(outcome) => {
                                    consecutive_failures = 0;
                                    if outcome == extractor::ExtractOutcome::RowUpserted {
                                        batch_upserts += 1;
                                    }
                                    if let Err(e) = event_queue.delete(&receipt_handle).await {
                                        error!(error = %e, "Failed to delete event message");
                                    }
                                }
                                Err(e) => {
                                    consecutive_failures += 1;
                                    error!(
                                        key = %event.object_key,
                                        error = %e,
                                        failures = consecutive_failures,
                                        "Failed to extract metadata"
                                    );
                                    // Message will be re-delivered or moved to DLQ
                                }
                            }
                        }

                        if batch_upserts > 0 {
                            refresh.refresh().await;
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(error = %e, "Failed to receive messages from queue");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }

    info!("Metadata worker shutting down");
    Ok(())
}
