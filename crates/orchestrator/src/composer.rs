//! Response composer
//!
//! Merges the user question and the successful tool evidence into one
//! bounded context and obtains one generated answer. Under token budget
//! pressure, lower-priority sections are truncated first; the full user
//! query and the highest-priority successful section are always preserved
//! intact. A backend failure is the one fatal error of the whole request.

use crate::dispatcher::DispatchOutcome;
use crate::session::AgentSession;
use caselake_common::errors::Result;
use caselake_common::llm::{estimate_tokens, LlmClient};
use caselake_common::metrics::record_composition;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const ANSWER_SYSTEM_PROMPT: &str =
    "You are a support analytics assistant. Answer based only on the provided \
     evidence; if the evidence is insufficient, say so rather than guessing.";

/// Returned without a backend call when no tool produced evidence
pub const NO_DATA_ANSWER: &str =
    "No data could be retrieved from any source for this question, so an answer \
     cannot be provided. Please retry, or narrow the question.";

/// Tokens reserved for prompt scaffolding around query and evidence
const SCAFFOLDING_TOKENS: usize = 200;

/// Sections with less remaining budget than this are dropped, not truncated
const MIN_SECTION_TOKENS: usize = 50;

pub struct Composer {
    llm: Arc<LlmClient>,
    token_budget: usize,
}

impl Composer {
    pub fn new(llm: Arc<LlmClient>, token_budget: usize) -> Self {
        Self { llm, token_budget }
    }

    /// Compose one answer for the turn. The assembled context is recorded on
    /// the session; the backend's text is returned verbatim, with an optional
    /// trailing note when some sources were unavailable.
    #[instrument(skip_all, fields(session_id = %session.session_id))]
    pub async fn compose(
        &self,
        session: &mut AgentSession,
        user_query: &str,
        outcome: &DispatchOutcome,
    ) -> Result<String> {
        let sections: Vec<(&'static str, &str)> = outcome
            .succeeded()
            .filter_map(|result| {
                result
                    .payload
                    .as_ref()
                    .map(|output| (result.tool_name.section_label(), output.evidence.as_str()))
            })
            .collect();

        if sections.is_empty() {
            info!("No successful tool results, returning explicit no-data answer");
            record_composition("no_data", 0);
            return Ok(NO_DATA_ANSWER.to_string());
        }

        let truncated = self.assemble(session, user_query, &sections);

        let prompt = format!(
            "Context from data tools:\n\n{}Human question:\n{}\n\n\
             Please provide a comprehensive answer based on the context provided \
             above. If the context doesn't contain enough information, please \
             mention that.",
            session.accumulated_context, user_query
        );

        let answer = match self
            .llm
            .complete(self.llm.answer_model(), ANSWER_SYSTEM_PROMPT, &prompt, 2000, 0.5)
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                record_composition("backend_error", truncated);
                return Err(e);
            }
        };

        record_composition("succeeded", truncated);

        let unavailable = outcome.unavailable();
        if unavailable.is_empty() {
            Ok(answer)
        } else {
            let names: Vec<&str> = unavailable.iter().map(|n| n.as_str()).collect();
            Ok(format!(
                "{}\n\nNote: some data sources were unavailable: {}.",
                answer,
                names.join(", ")
            ))
        }
    }

    /// Fill the session context from the sections, highest priority first,
    /// within the token budget. Returns how many sections were cut short.
    fn assemble(
        &self,
        session: &mut AgentSession,
        user_query: &str,
        sections: &[(&'static str, &str)],
    ) -> u64 {
        let reserved = estimate_tokens(user_query) + SCAFFOLDING_TOKENS;
        let mut remaining = self.token_budget.saturating_sub(reserved);
        let mut truncated = 0u64;

        for (index, (label, evidence)) in sections.iter().enumerate() {
            let cost = estimate_tokens(evidence);

            if index == 0 {
                // The highest-priority successful result is always intact
                session.accumulate(label, evidence);
                remaining = remaining.saturating_sub(cost);
                continue;
            }

            if cost <= remaining {
                session.accumulate(label, evidence);
                remaining -= cost;
            } else if remaining >= MIN_SECTION_TOKENS {
                let keep_chars = remaining * 4;
                let cut = truncate_chars(evidence, keep_chars);
                session.accumulate(label, &format!("{}\n[evidence truncated]", cut));
                debug!(section = label, "Section truncated under budget pressure");
                remaining = 0;
                truncated += 1;
            } else {
                debug!(section = label, "Section dropped under budget pressure");
                truncated += 1;
            }
        }

        truncated
    }
}

/// Cut a string to at most `max_chars` characters on a char boundary
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolName, ToolOutput, ToolResult, ToolStatus};
    use caselake_common::config::LlmConfig;
    use chrono::Utc;
    use std::collections::BTreeMap;

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

    fn succeeded(name: ToolName, evidence: &str) -> ToolResult {
        ToolResult {
            tool_name: name,
            started_at: Utc::now(),
            deadline: Utc::now(),
            status: ToolStatus::Succeeded,
            payload: Some(ToolOutput {
                evidence: evidence.to_string(),
                payload: serde_json::json!({}),
            }),
            error: None,
        }
    }

    fn failed(name: ToolName) -> ToolResult {
        ToolResult {
            tool_name: name,
            started_at: Utc::now(),
            deadline: Utc::now(),
            status: ToolStatus::Failed,
            payload: None,
            error: Some("boom".into()),
        }
    }

    fn outcome(results: Vec<ToolResult>) -> DispatchOutcome {
        let degraded = !results.iter().any(|r| r.succeeded());
        let results: BTreeMap<ToolName, ToolResult> =
            results.into_iter().map(|r| (r.tool_name, r)).collect();
        DispatchOutcome { results, degraded }
    }

    #[tokio::test]
    async fn test_answer_reflects_surviving_tool_when_sibling_failed() {
        let composer = Composer::new(offline_llm(), 4000);
        let mut session = AgentSession::new("s-1");

        let outcome = outcome(vec![
            failed(ToolName::CaseAggregation),
            succeeded(ToolName::KnowledgeInsight, "raising API limits fixed throttling"),
        ]);

        let answer = composer
            .compose(&mut session, "how was throttling fixed?", &outcome)
            .await
            .unwrap();

        // The offline backend echoes the prompt head, which carries the evidence
        assert!(answer.contains("raising API limits fixed throttling"));
        assert!(answer.contains("some data sources were unavailable: case_aggregation"));
    }

    #[tokio::test]
    async fn test_all_failed_states_no_data_without_backend_call() {
        let composer = Composer::new(offline_llm(), 4000);
        let mut session = AgentSession::new("s-2");

        let outcome = outcome(vec![
            failed(ToolName::CaseAggregation),
            failed(ToolName::KnowledgeInsight),
        ]);

        let answer = composer.compose(&mut session, "anything?", &outcome).await.unwrap();
        assert_eq!(answer, NO_DATA_ANSWER);
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_sections_assemble_in_priority_order() {
        let composer = Composer::new(offline_llm(), 8000);
        let mut session = AgentSession::new("s-3");

        // Declared out of order on purpose
        let outcome = outcome(vec![
            succeeded(ToolName::CostUsage, "COST-EVIDENCE"),
            succeeded(ToolName::CaseAggregation, "SQL-EVIDENCE"),
        ]);

        composer.compose(&mut session, "q", &outcome).await.unwrap();

        let ctx = &session.accumulated_context;
        let sql_at = ctx.find("SQL-EVIDENCE").unwrap();
        let cost_at = ctx.find("COST-EVIDENCE").unwrap();
        assert!(sql_at < cost_at);
    }

    #[tokio::test]
    async fn test_budget_preserves_top_section_and_truncates_lower() {
        // Budget only slightly above scaffolding: the top section must stay
        // whole, the second gets cut or dropped
        let composer = Composer::new(offline_llm(), SCAFFOLDING_TOKENS + 100);
        let mut session = AgentSession::new("s-4");

        let top = "T".repeat(2000);
        let lower = "L".repeat(2000);
        let outcome = outcome(vec![
            succeeded(ToolName::CaseAggregation, &top),
            succeeded(ToolName::KnowledgeInsight, &lower),
        ]);

        composer.compose(&mut session, "q", &outcome).await.unwrap();

        assert!(session.accumulated_context.contains(&top));
        assert!(!session.accumulated_context.contains(&lower));
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("ab", 5), "ab");
        // Multi-byte characters never split
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }

    mod pipeline {
        //! Whole-orchestrator flows: dispatch through composition

        use super::*;
        use crate::dispatcher::{DispatchConfig, ToolDispatcher};
        use crate::knowledge::{KnowledgeRetriever, Retrieval, Snippet};
        use crate::query_engine::{
            QueryEngine, QueryEngineAdapter, QueryJob, QueryJobState, QueryRow,
        };
        use crate::tools::{CaseAggregationTool, KnowledgeInsightTool, Tool};
        use async_trait::async_trait;
        use caselake_common::config::QueryEngineConfig;
        use caselake_common::errors::Result;
        use std::time::Duration;

        fn engine_config() -> QueryEngineConfig {
            QueryEngineConfig {
                base_url: "http://localhost:0".into(),
                max_execution_secs: 300,
                poll_initial_secs: 1,
                poll_cap_secs: 10,
            }
        }

        fn dispatch_config() -> DispatchConfig {
            DispatchConfig {
                max_parallel_tools: 3,
                tool_deadline: Duration::from_secs(310),
                outer_deadline: Duration::from_secs(330),
            }
        }

        /// Engine that immediately answers with one count row
        struct CountEngine;

        #[async_trait]
        impl QueryEngine for CountEngine {
            async fn submit(&self, _sql: &str) -> Result<QueryJob> {
                Ok(QueryJob { id: "count-job".into() })
            }

            async fn poll(&self, _job: &QueryJob) -> Result<QueryJobState> {
                let mut row = QueryRow::new();
                row.insert("case_count".into(), serde_json::json!(17));
                Ok(QueryJobState::Succeeded(vec![row]))
            }

            async fn cancel(&self, _job: &QueryJob) -> Result<()> {
                Ok(())
            }
        }

        /// Engine that never reaches a terminal state
        struct StuckEngine;

        #[async_trait]
        impl QueryEngine for StuckEngine {
            async fn submit(&self, _sql: &str) -> Result<QueryJob> {
                Ok(QueryJob { id: "stuck-job".into() })
            }

            async fn poll(&self, _job: &QueryJob) -> Result<QueryJobState> {
                Ok(QueryJobState::Running)
            }

            async fn cancel(&self, _job: &QueryJob) -> Result<()> {
                Ok(())
            }
        }

        struct OneSnippetRetriever;

        #[async_trait]
        impl KnowledgeRetriever for OneSnippetRetriever {
            async fn query(&self, _text: &str, _k: usize) -> Retrieval {
                Retrieval {
                    snippets: vec![Snippet {
                        document_ref: "case/2025/01/a-c1.json".into(),
                        score: 0.9,
                        snippet: "january saw seventeen new support cases".into(),
                    }],
                    degraded: false,
                }
            }
        }

        #[tokio::test]
        async fn test_count_query_flows_from_engine_to_answer() {
            let adapter = Arc::new(QueryEngineAdapter::new(Arc::new(CountEngine), &engine_config()));
            let tool: Arc<dyn Tool> = Arc::new(CaseAggregationTool::new(offline_llm(), adapter));

            let dispatcher = ToolDispatcher::new(dispatch_config());
            let outcome = dispatcher
                .dispatch("Total count of support cases in jan 2025", vec![tool])
                .await;

            let result = &outcome.results[&ToolName::CaseAggregation];
            assert!(result.succeeded());
            let evidence = &result.payload.as_ref().unwrap().evidence;
            assert!(evidence.contains("Row count: 1"));
            assert!(evidence.contains("case_count=17"));

            let composer = Composer::new(offline_llm(), 4000);
            let mut session = AgentSession::new("s-count");
            let answer = composer
                .compose(&mut session, "Total count of support cases in jan 2025", &outcome)
                .await
                .unwrap();

            assert!(!answer.is_empty());
            assert!(session.accumulated_context.contains("case_count=17"));
        }

        #[tokio::test(start_paused = true)]
        async fn test_stuck_query_degrades_to_remaining_tools() {
            let adapter = Arc::new(QueryEngineAdapter::new(Arc::new(StuckEngine), &engine_config()));
            let query_tool: Arc<dyn Tool> =
                Arc::new(CaseAggregationTool::new(offline_llm(), adapter));
            let knowledge_tool: Arc<dyn Tool> =
                Arc::new(KnowledgeInsightTool::new(Arc::new(OneSnippetRetriever), 5));

            let dispatcher = ToolDispatcher::new(dispatch_config());
            let outcome = dispatcher
                .dispatch("what happened in january?", vec![query_tool, knowledge_tool])
                .await;

            // The query hit its 300s execution cap and became a timeout
            assert_eq!(
                outcome.results[&ToolName::CaseAggregation].status,
                ToolStatus::TimedOut
            );
            assert!(outcome.results[&ToolName::KnowledgeInsight].succeeded());

            let composer = Composer::new(offline_llm(), 4000);
            let mut session = AgentSession::new("s-degraded");
            let answer = composer
                .compose(&mut session, "what happened in january?", &outcome)
                .await
                .unwrap();

            assert!(session.accumulated_context.contains("seventeen new support cases"));
            assert!(answer.contains("some data sources were unavailable: case_aggregation"));
        }
    }
}
