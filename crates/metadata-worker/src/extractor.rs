//! Metadata extractor
//!
//! Derives one flat metadata row per case lake object and upserts it keyed by
//! the object key, so at-least-once event delivery and object rewrites both
//! converge on a single row. Fields absent from older objects default to
//! empty instead of failing the row.

use caselake_common::db::MetadataRepository;
use caselake_common::errors::{AppError, Result};
use caselake_common::lake::ObjectReader;
use caselake_common::metrics::record_extraction;
use caselake_common::queue::ObjectWrittenEvent;
use caselake_common::records::{CaseMetadataRow, EntityKind};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// What one event processing produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// A metadata row was written or replaced
    RowUpserted,
    /// The object is not a case; acknowledged without a row
    Skipped,
}

/// Per-object metadata extraction
pub struct MetadataExtractor {
    lake: Arc<dyn ObjectReader>,
    repository: MetadataRepository,
}

impl MetadataExtractor {
    pub fn new(lake: Arc<dyn ObjectReader>, repository: MetadataRepository) -> Self {
        Self { lake, repository }
    }

    /// Process one object-written event. Idempotent: re-processing the same
    /// object key produces the same row.
    #[instrument(skip(self, event), fields(key = %event.object_key))]
    pub async fn extract(&self, event: &ObjectWrittenEvent) -> Result<ExtractOutcome> {
        if event.entity_type != EntityKind::Case {
            debug!(kind = %event.entity_type, "Non-case object, nothing to extract");
            return Ok(ExtractOutcome::Skipped);
        }

        let body = self
            .lake
            .get(&event.object_key)
            .await?
            .ok_or_else(|| AppError::Lake {
                message: format!("object {} not found", event.object_key),
            })?;

        let value: Value = serde_json::from_slice(&body)?;
        let Some(row) = derive_row(&event.object_key, &value) else {
            warn!("Object is not a case payload, skipping");
            return Ok(ExtractOutcome::Skipped);
        };

        self.repository.upsert_row(&row).await?;
        record_extraction(true);
        info!(case_id = %row.case_id, "Metadata row upserted");

        Ok(ExtractOutcome::RowUpserted)
    }
}

/// Derive the metadata row for one lake object, or None when the object is
/// not a case. Absent fields default to empty (schema drift tolerance).
pub fn derive_row(object_key: &str, value: &Value) -> Option<CaseMetadataRow> {
    if value.get("entity_type").and_then(Value::as_str) != Some("case") {
        return None;
    }

    Some(CaseMetadataRow {
        object_key: object_key.to_string(),
        account_id: field(value, "account_id"),
        case_id: field(value, "case_id"),
        created_at: field(value, "created_at"),
        severity: field(value, "severity"),
        status: field(value, "status"),
        subject: field(value, "subject"),
        category: field(value, "category"),
        service: field(value, "service"),
    })
}

fn field(value: &Value, name: &str) -> String {
    value
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Best-effort signal asking the knowledge service to re-ingest the lake
/// after fresh metadata lands. Refresh failures are logged, never escalated.
pub struct IndexRefreshClient {
    client: reqwest::Client,
    base_url: String,
}

impl IndexRefreshClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn refresh(&self) {
        let url = format!("{}/v1/index/refresh", self.base_url);
        match self.client.post(&url).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Knowledge index refresh requested");
            }
            Ok(response) => {
                warn!(status = response.status().as_u16(), "Index refresh rejected");
            }
            Err(e) => {
                warn!(error = %e, "Index refresh request failed");
            }
        }
    }
}
