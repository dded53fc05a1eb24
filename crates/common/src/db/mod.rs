//! Metadata database layer
//!
//! Provides:
//! - Connection pool management
//! - The `case_metadata` table and its upsert-by-object-key access path

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use crate::records::CaseMetadataRow;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    pool: PgPool,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to metadata database...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect: {}", e),
            })?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    pub fn inner(&self) -> &PgPool {
        &self.pool
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Ping failed: {}", e),
            })?;
        Ok(())
    }
}

/// Access path for the case metadata table.
///
/// One row per case lake object, keyed by the object key so re-processing the
/// same object replaces its row instead of appending a duplicate.
#[derive(Clone)]
pub struct MetadataRepository {
    db: DbPool,
}

impl MetadataRepository {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Create the metadata table if it does not exist
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS case_metadata (
                object_key  TEXT PRIMARY KEY,
                account_id  TEXT NOT NULL,
                case_id     TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                severity    TEXT NOT NULL,
                status      TEXT NOT NULL,
                subject     TEXT NOT NULL,
                category    TEXT NOT NULL,
                service     TEXT NOT NULL
            )
            "#,
        )
        .execute(self.db.inner())
        .await?;
        Ok(())
    }

    /// Insert or replace the row derived from one lake object
    pub async fn upsert_row(&self, row: &CaseMetadataRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO case_metadata
                (object_key, account_id, case_id, created_at, severity,
                 status, subject, category, service)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (object_key) DO UPDATE SET
                account_id = EXCLUDED.account_id,
                case_id    = EXCLUDED.case_id,
                created_at = EXCLUDED.created_at,
                severity   = EXCLUDED.severity,
                status     = EXCLUDED.status,
                subject    = EXCLUDED.subject,
                category   = EXCLUDED.category,
                service    = EXCLUDED.service
            "#,
        )
        .bind(&row.object_key)
        .bind(&row.account_id)
        .bind(&row.case_id)
        .bind(&row.created_at)
        .bind(&row.severity)
        .bind(&row.status)
        .bind(&row.subject)
        .bind(&row.category)
        .bind(&row.service)
        .execute(self.db.inner())
        .await?;
        Ok(())
    }

    /// Fetch the row for one object key, if present
    pub async fn get_row(&self, object_key: &str) -> Result<Option<CaseMetadataRow>> {
        let row = sqlx::query(
            r#"
            SELECT object_key, account_id, case_id, created_at, severity,
                   status, subject, category, service
            FROM case_metadata
            WHERE object_key = $1
            "#,
        )
        .bind(object_key)
        .fetch_optional(self.db.inner())
        .await?;

        Ok(row.map(row_from_pg))
    }

    /// Total number of metadata rows
    pub async fn count_rows(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM case_metadata")
            .fetch_one(self.db.inner())
            .await?;
        Ok(row.get::<i64, _>("n"))
    }
}

fn row_from_pg(row: PgRow) -> CaseMetadataRow {
    CaseMetadataRow {
        object_key: row.get("object_key"),
        account_id: row.get("account_id"),
        case_id: row.get("case_id"),
        created_at: row.get("created_at"),
        severity: row.get("severity"),
        status: row.get("status"),
        subject: row.get("subject"),
        category: row.get("category"),
        service: row.get("service"),
    }
}
