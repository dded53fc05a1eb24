//! Structured-query tool
//!
//! Asks the SQL sub-model to translate the user's question into a query over
//! the `case_metadata` table, then executes it through the query engine
//! adapter. A timed-out or failed query is surfaced as this tool's failure,
//! never retried here.

use super::{Tool, ToolName, ToolOutput};
use crate::query_engine::{QueryEngineAdapter, QueryRow};
use async_trait::async_trait;
use caselake_common::errors::Result;
use caselake_common::llm::LlmClient;
use caselake_common::records::SEVERITIES;
use std::sync::Arc;
use tracing::{debug, instrument};

const SQL_SYSTEM_PROMPT: &str =
    "You are a SQL expert with extensive experience writing analytic queries.";

/// Rows beyond this are summarized by count rather than inlined as evidence
const MAX_EVIDENCE_ROWS: usize = 50;

pub struct CaseAggregationTool {
    llm: Arc<LlmClient>,
    adapter: Arc<QueryEngineAdapter>,
}

impl CaseAggregationTool {
    pub fn new(llm: Arc<LlmClient>, adapter: Arc<QueryEngineAdapter>) -> Self {
        Self { llm, adapter }
    }

    fn sql_prompt(user_query: &str) -> String {
        format!(
            "Using the table 'case_metadata' (fields: account_id, case_id, created_at, \
             severity, status, subject, category, service), generate a SQL query matching \
             the following natural language request: '{}'. Important rules: \
             (1) Always use the SQL LIKE operator (not '=') with wildcards ('%') when filtering the field 'service'. \
             (2) Use plain string literals for date conditions (e.g., 'YYYY-MM-DD') rather than TIMESTAMP literals. \
             (3) Return only the SQL query without commentary. \
             (4) When filtering for specific dates, use SUBSTRING(created_at, 1, 10) = 'YYYY-MM-DD' format. \
             (5) Severity is either of the following: {}. \
             (6) Always use LOWER() when matching 'service' to ensure case-insensitive comparison. \
             Keep it simple, dont use timezone functions. DONT USE ANY MARKDOWN",
            user_query,
            SEVERITIES.join(", "),
        )
    }

    fn render_evidence(sql: &str, rows: &[QueryRow]) -> String {
        let mut evidence = format!("Generated SQL: {}\nRow count: {}\n", sql, rows.len());
        for row in rows.iter().take(MAX_EVIDENCE_ROWS) {
            let rendered: Vec<String> = row
                .iter()
                .map(|(column, value)| format!("{}={}", column, value))
                .collect();
            evidence.push_str(&rendered.join(", "));
            evidence.push('\n');
        }
        if rows.len() > MAX_EVIDENCE_ROWS {
            evidence.push_str(&format!("... {} more rows omitted\n", rows.len() - MAX_EVIDENCE_ROWS));
        }
        evidence
    }
}

#[async_trait]
impl Tool for CaseAggregationTool {
    fn name(&self) -> ToolName {
        ToolName::CaseAggregation
    }

    #[instrument(skip(self, query))]
    async fn run(&self, query: &str) -> Result<ToolOutput> {
        let sql = self
            .llm
            .complete(
                self.llm.sql_model(),
                SQL_SYSTEM_PROMPT,
                &Self::sql_prompt(query),
                1000,
                0.3,
            )
            .await?
            .trim()
            .to_string();

        debug!(sql = %sql, "Generated SQL query");

        let rows = self.adapter.execute(&sql).await?;

        Ok(ToolOutput {
            evidence: Self::render_evidence(&sql, &rows),
            payload: serde_json::json!({
                "generated_query": sql,
                "rows": rows,
            }),
        })
    }
}
