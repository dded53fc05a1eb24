//! Intent planning
//!
//! Maps one user question to its candidate tool set using keyword
//! heuristics. The dispatcher executes whatever this step selects and adds
//! nothing of its own, so tightening the planner never changes dispatch
//! semantics.

use crate::tools::ToolName;

const AGGREGATION_MARKERS: &[&str] = &[
    "count", "how many", "total", "average", "sum", "number of", "per month",
    "per service", "trend", "most", "fewest", "breakdown",
];

const ADVISORY_MARKERS: &[&str] = &[
    "advisory", "advisor", "check", "recommendation", "deprecat", "eol",
    "end-of-life", "end of life", "flagged",
];

const COST_MARKERS: &[&str] = &["cost", "usage", "spend", "billing", "volume"];

/// Select candidate tools for one question, in priority order
pub fn plan_tools(query: &str) -> Vec<ToolName> {
    let query = query.to_lowercase();
    let mut tools = Vec::new();

    if contains_any(&query, AGGREGATION_MARKERS) {
        tools.push(ToolName::CaseAggregation);
    }
    if contains_any(&query, ADVISORY_MARKERS) {
        tools.push(ToolName::Advisory);
    }
    if contains_any(&query, COST_MARKERS) {
        tools.push(ToolName::CostUsage);
    }

    // Semantic retrieval backs every question
    tools.push(ToolName::KnowledgeInsight);

    tools.sort();
    tools.dedup();
    tools
}

fn contains_any(query: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| query.contains(marker))
}
