//! Tool dispatcher
//!
//! Runs a candidate tool set concurrently under a fixed concurrency bound.
//! Every tool call carries its own deadline; a slot is freed the moment its
//! deadline elapses. A global outer deadline bounds the whole dispatch: at
//! expiry all still-pending tools are marked timed out and whatever succeeded
//! is returned. Cancellation is best-effort and local: a timed-out slot
//! does not guarantee the underlying remote operation stopped.

use crate::tools::{Tool, ToolName, ToolResult, ToolStatus};
use caselake_common::config::OrchestratorConfig;
use caselake_common::errors::AppError;
use caselake_common::metrics::{record_dispatch, record_tool_run};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, instrument, warn};

/// Dispatch knobs
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Concurrency bound (`MAX_PARALLEL_TOOLS`)
    pub max_parallel_tools: usize,
    /// Per-tool deadline
    pub tool_deadline: Duration,
    /// Outer deadline for the whole dispatch
    pub outer_deadline: Duration,
}

impl From<&OrchestratorConfig> for DispatchConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_parallel_tools: config.max_parallel_tools.max(1),
            tool_deadline: Duration::from_secs(config.tool_deadline_secs),
            outer_deadline: Duration::from_secs(config.dispatch_deadline_secs),
        }
    }
}

/// What one dispatch produced: a result per candidate tool, aggregated in
/// fixed priority order. An all-failed outcome is valid, flagged `degraded`.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub results: BTreeMap<ToolName, ToolResult>,
    pub degraded: bool,
}

impl DispatchOutcome {
    /// Successful results in priority order
    pub fn succeeded(&self) -> impl Iterator<Item = &ToolResult> {
        self.results.values().filter(|r| r.succeeded())
    }

    /// Names of tools that did not succeed, in priority order
    pub fn unavailable(&self) -> Vec<ToolName> {
        self.results
            .iter()
            .filter(|(_, r)| !r.succeeded())
            .map(|(name, _)| *name)
            .collect()
    }
}

/// Bounded-concurrency tool executor
pub struct ToolDispatcher {
    config: DispatchConfig,
}

impl ToolDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self { config }
    }

    /// Execute the given candidate set. The set is whatever intent planning
    /// selected; the dispatcher adds no tools of its own.
    #[instrument(skip(self, query, tools), fields(candidates = tools.len()))]
    pub async fn dispatch(&self, query: &str, tools: Vec<Arc<dyn Tool>>) -> DispatchOutcome {
        let wall_start = std::time::Instant::now();
        let dispatch_started_at = Utc::now();
        let outer_deadline = tokio::time::Instant::now() + self.config.outer_deadline;

        let expected: Vec<ToolName> = tools.iter().map(|t| t.name()).collect();
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_tools));
        let (tx, mut rx) = mpsc::unbounded_channel::<(ToolName, ToolResult)>();
        let mut handles = Vec::with_capacity(tools.len());

        for tool in tools {
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            let query = query.to_string();
            let tool_deadline = self.config.tool_deadline;

            handles.push(tokio::spawn(async move {
                // Excess candidates queue here until a slot frees
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };

                let name = tool.name();
                let started_at = Utc::now();
                let deadline = started_at
                    + chrono::Duration::from_std(tool_deadline)
                        .unwrap_or_else(|_| chrono::Duration::zero());

                let result = match tokio::time::timeout(tool_deadline, tool.run(&query)).await {
                    Ok(Ok(output)) => ToolResult {
                        tool_name: name,
                        started_at,
                        deadline,
                        status: ToolStatus::Succeeded,
                        payload: Some(output),
                        error: None,
                    },
                    Ok(Err(e)) => {
                        // A query that hit its execution cap is a timeout,
                        // not a failure; it is never retried here.
                        let status = if matches!(e, AppError::QueryTimeout { .. }) {
                            ToolStatus::TimedOut
                        } else {
                            ToolStatus::Failed
                        };
                        warn!(tool = %name, error = %e, "Tool did not succeed");
                        ToolResult {
                            tool_name: name,
                            started_at,
                            deadline,
                            status,
                            payload: None,
                            error: Some(e.to_string()),
                        }
                    }
                    Err(_) => ToolResult {
                        tool_name: name,
                        started_at,
                        deadline,
                        status: ToolStatus::TimedOut,
                        payload: None,
                        error: Some(format!(
                            "tool deadline of {}s elapsed",
                            tool_deadline.as_secs()
                        )),
                    },
                };

                record_tool_run(name.as_str(), result.status.as_str());
                let _ = tx.send((name, result));
            }));
        }
        drop(tx);

        // Collect until every tool reported or the outer deadline fires
        let mut results: BTreeMap<ToolName, ToolResult> = BTreeMap::new();
        loop {
            match tokio::time::timeout_at(outer_deadline, rx.recv()).await {
                Ok(Some((name, result))) => {
                    results.insert(name, result);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("Outer dispatch deadline elapsed, returning partial results");
                    for handle in &handles {
                        handle.abort();
                    }
                    break;
                }
            }
        }

        // Whatever never reported is timed out as of the outer deadline
        for name in expected {
            if !results.contains_key(&name) {
                record_tool_run(name.as_str(), ToolStatus::TimedOut.as_str());
                results.insert(
                    name,
                    ToolResult {
                        tool_name: name,
                        started_at: dispatch_started_at,
                        deadline: Utc::now(),
                        status: ToolStatus::TimedOut,
                        payload: None,
                        error: Some("outer dispatch deadline elapsed".into()),
                    },
                );
            }
        }

        let degraded = !results.values().any(ToolResult::succeeded);
        record_dispatch(wall_start.elapsed().as_secs_f64(), degraded);
        info!(
            tools = results.len(),
            succeeded = results.values().filter(|r| r.succeeded()).count(),
            degraded,
            "Dispatch complete"
        );

        DispatchOutcome { results, degraded }
    }
}
