//! Advisory tool
//!
//! Aggregates recent advisory check results from the lake (counts by
//! category and status, flagged resource totals) and, when the advisory
//! sub-model is available, asks it for a short findings analysis. Analysis
//! failure keeps the aggregate evidence; only a lake failure fails the tool.

use super::{Tool, ToolName, ToolOutput};
use async_trait::async_trait;
use caselake_common::errors::Result;
use caselake_common::lake::ObjectReader;
use caselake_common::llm::LlmClient;
use caselake_common::records::{CheckResult, Record};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{instrument, warn};

const ADVISORY_SYSTEM_PROMPT: &str =
    "You are an advisory findings analyst. Summarize check results into a short, \
     actionable assessment with clear priorities.";

/// Newest check objects considered per run
const MAX_CHECKS: usize = 50;

pub struct AdvisoryTool {
    lake: Arc<dyn ObjectReader>,
    llm: Arc<LlmClient>,
}

#[derive(Default)]
struct CategorySummary {
    checks: u64,
    flagged_resources: u64,
    statuses: BTreeMap<String, u64>,
}

impl AdvisoryTool {
    pub fn new(lake: Arc<dyn ObjectReader>, llm: Arc<LlmClient>) -> Self {
        Self { lake, llm }
    }

    async fn load_recent_checks(&self) -> Result<Vec<CheckResult>> {
        let keys = self.lake.list("ta/").await?;
        let mut checks = Vec::new();

        // Keys sort by date partition, so the tail is the newest window
        for key in keys.iter().rev().take(MAX_CHECKS) {
            let Some(body) = self.lake.get(key).await? else { continue };
            match serde_json::from_slice::<Record>(&body) {
                Ok(Record::Ta(check)) => checks.push(check),
                Ok(_) => {}
                Err(e) => warn!(key = %key, error = %e, "Skipping unparseable check object"),
            }
        }

        Ok(checks)
    }

    fn summarize(checks: &[CheckResult]) -> String {
        let mut by_category: BTreeMap<&str, CategorySummary> = BTreeMap::new();
        for check in checks {
            let entry = by_category.entry(check.category.as_str()).or_default();
            entry.checks += 1;
            entry.flagged_resources += check.flagged_resources;
            *entry.statuses.entry(check.status.clone()).or_default() += 1;
        }

        let mut summary = format!("Recent advisory checks: {}\n", checks.len());
        for (category, counts) in &by_category {
            let statuses: Vec<String> = counts
                .statuses
                .iter()
                .map(|(status, n)| format!("{} {}", n, status))
                .collect();
            summary.push_str(&format!(
                "- {}: {} checks ({}), {} flagged resources\n",
                if category.is_empty() { "uncategorized" } else { category },
                counts.checks,
                statuses.join(", "),
                counts.flagged_resources,
            ));
        }
        summary
    }
}

#[async_trait]
impl Tool for AdvisoryTool {
    fn name(&self) -> ToolName {
        ToolName::Advisory
    }

    #[instrument(skip(self, query))]
    async fn run(&self, query: &str) -> Result<ToolOutput> {
        let checks = self.load_recent_checks().await?;

        if checks.is_empty() {
            return Ok(ToolOutput {
                evidence: "No advisory check results are available yet.".into(),
                payload: serde_json::json!({ "checks": [] }),
            });
        }

        let mut evidence = Self::summarize(&checks);

        // Sub-model analysis is a bonus on top of the aggregate numbers
        let analysis_prompt = format!(
            "User question: {}\n\nAdvisory check summary:\n{}\nProvide a short analysis.",
            query, evidence
        );
        match self
            .llm
            .complete(self.llm.advisory_model(), ADVISORY_SYSTEM_PROMPT, &analysis_prompt, 500, 0.1)
            .await
        {
            Ok(analysis) => {
                evidence.push_str("\nAnalysis: ");
                evidence.push_str(&analysis);
            }
            Err(e) => {
                warn!(error = %e, "Advisory analysis unavailable, using aggregates only");
            }
        }

        Ok(ToolOutput {
            payload: serde_json::json!({ "checks": checks }),
            evidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caselake_common::config::LlmConfig;
    use caselake_common::lake::{MemoryObjectStore, ObjectWriter};
    use chrono::{TimeZone, Utc};

    fn offline_llm() -> Arc<LlmClient> {
        Arc::new(
            LlmClient::new(LlmConfig {
                endpoint: "http://localhost:0".into(),
                api_key: None,
                answer_model: "m".into(),
                sql_model: "m".into(),
                advisory_model: "m".into(),
                timeout_secs: 5,
            })
            .unwrap(),
        )
    }

    fn check(id: &str, category: &str, status: &str, flagged: u64) -> Record {
        Record::Ta(CheckResult {
            account_id: "123456789012".into(),
            check_id: id.into(),
            timestamp: Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
            name: id.into(),
            category: category.into(),
            status: status.into(),
            flagged_resources: flagged,
            last_updated_at: Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
        })
    }

    #[tokio::test]
    async fn test_aggregates_checks_by_category() {
        let lake = Arc::new(MemoryObjectStore::new());
        for record in [
            check("chk-1", "service_limits", "warning", 3),
            check("chk-2", "service_limits", "ok", 0),
            check("chk-3", "security", "error", 7),
        ] {
            let body = serde_json::to_vec(&record).unwrap();
            lake.put(&record.lake_key(), &body).await.unwrap();
        }

        let tool = AdvisoryTool::new(lake, offline_llm());
        let output = tool.run("any deprecated services?").await.unwrap();

        assert!(output.evidence.contains("Recent advisory checks: 3"));
        assert!(output.evidence.contains("service_limits: 2 checks"));
        assert!(output.evidence.contains("security: 1 checks"));
        assert!(output.evidence.contains("7 flagged resources"));
    }

    #[tokio::test]
    async fn test_empty_lake_yields_no_findings_evidence() {
        let tool = AdvisoryTool::new(Arc::new(MemoryObjectStore::new()), offline_llm());
        let output = tool.run("advisory status").await.unwrap();
        assert!(output.evidence.contains("No advisory check results"));
    }
}
