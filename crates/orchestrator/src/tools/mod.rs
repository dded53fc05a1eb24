//! Evidence-gathering tools
//!
//! A tool is any unit of work the orchestrator can invoke to gather evidence
//! for an answer. Tools are selected upstream (intent planning) and executed
//! by the dispatcher; each produces a text evidence section plus a structured
//! payload, or an error that degrades only its own slot.

mod advisory;
mod case_aggregation;
mod cost;
mod knowledge_insight;

pub use advisory::AdvisoryTool;
pub use case_aggregation::CaseAggregationTool;
pub use cost::CostUsageTool;
pub use knowledge_insight::KnowledgeInsightTool;

use async_trait::async_trait;
use caselake_common::errors::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The known tools, declared in composition priority order: structured-query
/// evidence outranks knowledge snippets, which outrank advisory and cost
/// evidence. Ordering of this enum IS the priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    CaseAggregation,
    KnowledgeInsight,
    Advisory,
    CostUsage,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::CaseAggregation => "case_aggregation",
            ToolName::KnowledgeInsight => "knowledge_insight",
            ToolName::Advisory => "advisory",
            ToolName::CostUsage => "cost_usage",
        }
    }

    /// Section heading used when composing this tool's evidence
    pub fn section_label(&self) -> &'static str {
        match self {
            ToolName::CaseAggregation => "Structured query results",
            ToolName::KnowledgeInsight => "Knowledge base findings",
            ToolName::Advisory => "Advisory check findings",
            ToolName::CostUsage => "Cost and usage figures",
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal (or in-flight) status of one tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Succeeded,
    Failed,
    TimedOut,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Pending => "pending",
            ToolStatus::Succeeded => "succeeded",
            ToolStatus::Failed => "failed",
            ToolStatus::TimedOut => "timed_out",
        }
    }
}

/// What a successful tool run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Text evidence section for the composer
    pub evidence: String,
    /// Structured payload for programmatic callers
    pub payload: serde_json::Value,
}

/// Ephemeral record of one tool invocation within a dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: ToolName,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub status: ToolStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<ToolOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn succeeded(&self) -> bool {
        self.status == ToolStatus::Succeeded
    }
}

/// A unit of evidence-gathering work
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> ToolName;

    /// Run the tool against one user query
    async fn run(&self, query: &str) -> Result<ToolOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order_is_declaration_order() {
        assert!(ToolName::CaseAggregation < ToolName::KnowledgeInsight);
        assert!(ToolName::KnowledgeInsight < ToolName::Advisory);
        assert!(ToolName::Advisory < ToolName::CostUsage);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ToolStatus::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
    }
}
