//! Query engine adapter
//!
//! Submits a structured query against the metadata table and polls it to
//! completion with exponential backoff. A query that outlives the execution
//! cap is cancelled best-effort and surfaced as a timeout; the caller must
//! not assume the job actually stopped server-side. Timed-out or failed
//! queries are never retried automatically.

use async_trait::async_trait;
use caselake_common::config::QueryEngineConfig;
use caselake_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One result row: ordered mapping from column name to value
pub type QueryRow = BTreeMap<String, serde_json::Value>;

/// Handle for a submitted query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryJob {
    pub id: String,
}

/// Observed state of a submitted query
#[derive(Debug, Clone)]
pub enum QueryJobState {
    Running,
    Succeeded(Vec<QueryRow>),
    Failed(String),
}

/// Access to the analytic query service
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Submit a query for execution
    async fn submit(&self, sql: &str) -> Result<QueryJob>;

    /// Observe the current state of a submitted query
    async fn poll(&self, job: &QueryJob) -> Result<QueryJobState>;

    /// Best-effort cancellation of a submitted query
    async fn cancel(&self, job: &QueryJob) -> Result<()>;
}

/// Drives a [`QueryEngine`] from submission to a terminal state or timeout
pub struct QueryEngineAdapter {
    engine: Arc<dyn QueryEngine>,
    max_execution: Duration,
    poll_initial: Duration,
    poll_cap: Duration,
}

impl QueryEngineAdapter {
    pub fn new(engine: Arc<dyn QueryEngine>, config: &QueryEngineConfig) -> Self {
        Self {
            engine,
            max_execution: Duration::from_secs(config.max_execution_secs),
            poll_initial: Duration::from_secs(config.poll_initial_secs.max(1)),
            poll_cap: Duration::from_secs(config.poll_cap_secs.max(1)),
        }
    }

    /// Submit once and poll to completion. Poll iterations check elapsed
    /// time, not just job state, so the surrounding dispatch deadline holds.
    pub async fn execute(&self, sql: &str) -> Result<Vec<QueryRow>> {
        let job = self.engine.submit(sql).await?;
        debug!(job_id = %job.id, "Query submitted");

        let started = tokio::time::Instant::now();
        let mut interval = self.poll_initial;

        loop {
            match self.engine.poll(&job).await? {
                QueryJobState::Succeeded(rows) => {
                    debug!(job_id = %job.id, rows = rows.len(), "Query succeeded");
                    return Ok(rows);
                }
                QueryJobState::Failed(reason) => {
                    return Err(AppError::QueryFailed { reason });
                }
                QueryJobState::Running => {}
            }

            let elapsed = started.elapsed();
            if elapsed >= self.max_execution {
                if let Err(e) = self.engine.cancel(&job).await {
                    warn!(job_id = %job.id, error = %e, "Best-effort cancel failed");
                }
                return Err(AppError::QueryTimeout {
                    timeout_secs: self.max_execution.as_secs(),
                });
            }

            // Never sleep past the execution cap
            let remaining = self.max_execution - elapsed;
            tokio::time::sleep(interval.min(remaining)).await;
            interval = (interval * 2).min(self.poll_cap);
        }
    }
}

/// HTTP client for the analytic query service
pub struct HttpQueryEngine {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    sql: &'a str,
}

#[derive(Deserialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Deserialize)]
struct PollResponse {
    state: String,
    #[serde(default)]
    rows: Option<Vec<QueryRow>>,
    #[serde(default)]
    reason: Option<String>,
}

impl HttpQueryEngine {
    pub fn new(config: &QueryEngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl QueryEngine for HttpQueryEngine {
    async fn submit(&self, sql: &str) -> Result<QueryJob> {
        let response = self
            .client
            .post(format!("{}/v1/queries", self.base_url))
            .json(&SubmitRequest { sql })
            .send()
            .await?
            .error_for_status()
            .map_err(|e| AppError::QueryFailed {
                reason: format!("submit rejected: {}", e),
            })?;

        let body: SubmitResponse = response.json().await?;
        Ok(QueryJob { id: body.job_id })
    }

    async fn poll(&self, job: &QueryJob) -> Result<QueryJobState> {
        let response = self
            .client
            .get(format!("{}/v1/queries/{}", self.base_url, job.id))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| AppError::QueryFailed {
                reason: format!("poll rejected: {}", e),
            })?;

        let body: PollResponse = response.json().await?;
        match body.state.as_str() {
            "succeeded" => Ok(QueryJobState::Succeeded(body.rows.unwrap_or_default())),
            "failed" | "cancelled" => Ok(QueryJobState::Failed(
                body.reason.unwrap_or_else(|| body.state.clone()),
            )),
            _ => Ok(QueryJobState::Running),
        }
    }

    async fn cancel(&self, job: &QueryJob) -> Result<()> {
        self.client
            .delete(format!("{}/v1/queries/{}", self.base_url, job.id))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| AppError::QueryFailed {
                reason: format!("cancel rejected: {}", e),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn adapter_config(max_secs: u64) -> QueryEngineConfig {
        QueryEngineConfig {
            base_url: "http://localhost:0".into(),
            max_execution_secs: max_secs,
            poll_initial_secs: 1,
            poll_cap_secs: 10,
        }
    }

    /// Engine fake that stays running for `runs_for` polls, then succeeds
    struct SlowEngine {
        runs_for: u32,
        polls: AtomicU32,
        cancelled: AtomicBool,
    }

    impl SlowEngine {
        fn new(runs_for: u32) -> Self {
            Self {
                runs_for,
                polls: AtomicU32::new(0),
                cancelled: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl QueryEngine for SlowEngine {
        async fn submit(&self, _sql: &str) -> Result<QueryJob> {
            Ok(QueryJob { id: "job-1".into() })
        }

        async fn poll(&self, _job: &QueryJob) -> Result<QueryJobState> {
            let seen = self.polls.fetch_add(1, Ordering::SeqCst);
            if seen >= self.runs_for {
                let mut row = QueryRow::new();
                row.insert("case_count".into(), serde_json::json!(42));
                Ok(QueryJobState::Succeeded(vec![row]))
            } else {
                Ok(QueryJobState::Running)
            }
        }

        async fn cancel(&self, _job: &QueryJob) -> Result<()> {
            self.cancelled.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_polls_to_success() {
        let engine = Arc::new(SlowEngine::new(3));
        let adapter = QueryEngineAdapter::new(engine.clone(), &adapter_config(300));

        let rows = adapter.execute("SELECT COUNT(*) FROM case_metadata").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["case_count"], serde_json::json!(42));
        assert!(!engine.cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_terminal_query_times_out_and_cancels() {
        let engine = Arc::new(SlowEngine::new(u32::MAX));
        let adapter = QueryEngineAdapter::new(engine.clone(), &adapter_config(300));

        let err = adapter.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err, AppError::QueryTimeout { timeout_secs: 300 }));
        assert!(engine.cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_caps_poll_count() {
        // With 1s initial doubling to a 10s cap, 300s of polling takes far
        // fewer than 300 polls.
        let engine = Arc::new(SlowEngine::new(u32::MAX));
        let adapter = QueryEngineAdapter::new(engine.clone(), &adapter_config(300));

        let _ = adapter.execute("SELECT 1").await;
        let polls = engine.polls.load(Ordering::SeqCst);
        assert!(polls < 40, "expected capped backoff, saw {} polls", polls);
        assert!(polls > 5);
    }

    struct FailingEngine;

    #[async_trait]
    impl QueryEngine for FailingEngine {
        async fn submit(&self, _sql: &str) -> Result<QueryJob> {
            Ok(QueryJob { id: "job-2".into() })
        }

        async fn poll(&self, _job: &QueryJob) -> Result<QueryJobState> {
            Ok(QueryJobState::Failed("syntax error at line 1".into()))
        }

        async fn cancel(&self, _job: &QueryJob) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_query_surfaces_reason() {
        let adapter = QueryEngineAdapter::new(Arc::new(FailingEngine), &adapter_config(300));
        let err = adapter.execute("SELEC 1").await.unwrap_err();
        match err {
            AppError::QueryFailed { reason } => assert!(reason.contains("syntax error")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
