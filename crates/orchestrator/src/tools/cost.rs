//! Cost/usage tool
//!
//! Case volume by service and severity is the usage proxy the metadata table
//! supports; the figures come back through the query engine adapter like any
//! other structured query.

use super::{Tool, ToolName, ToolOutput};
use crate::query_engine::QueryEngineAdapter;
use async_trait::async_trait;
use caselake_common::errors::Result;
use std::sync::Arc;
use tracing::instrument;

const USAGE_SQL: &str = "SELECT service, severity, COUNT(*) AS case_count \
     FROM case_metadata GROUP BY service, severity ORDER BY case_count DESC";

pub struct CostUsageTool {
    adapter: Arc<QueryEngineAdapter>,
}

impl CostUsageTool {
    pub fn new(adapter: Arc<QueryEngineAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl Tool for CostUsageTool {
    fn name(&self) -> ToolName {
        ToolName::CostUsage
    }

    #[instrument(skip(self, _query))]
    async fn run(&self, _query: &str) -> Result<ToolOutput> {
        let rows = self.adapter.execute(USAGE_SQL).await?;

        let mut evidence = format!("Support volume by service and severity ({} groups):\n", rows.len());
        for row in &rows {
            let service = row.get("service").and_then(|v| v.as_str()).unwrap_or("unknown");
            let severity = row.get("severity").and_then(|v| v.as_str()).unwrap_or("unknown");
            let count = row.get("case_count").cloned().unwrap_or_default();
            evidence.push_str(&format!("- {} / {}: {}\n", service, severity, count));
        }

        Ok(ToolOutput {
            payload: serde_json::json!({ "groups": rows }),
            evidence,
        })
    }
}
