//! Knowledge tool
//!
//! Wraps the semantic retriever: its evidence is the retrieved snippets in
//! source order. An unavailable index fails this tool only; the dispatch
//! carries on with whatever else succeeded.

use super::{Tool, ToolName, ToolOutput};
use crate::knowledge::KnowledgeRetriever;
use async_trait::async_trait;
use caselake_common::errors::{AppError, Result};
use std::sync::Arc;
use tracing::instrument;

pub struct KnowledgeInsightTool {
    retriever: Arc<dyn KnowledgeRetriever>,
    top_k: usize,
}

impl KnowledgeInsightTool {
    pub fn new(retriever: Arc<dyn KnowledgeRetriever>, top_k: usize) -> Self {
        Self { retriever, top_k }
    }
}

#[async_trait]
impl Tool for KnowledgeInsightTool {
    fn name(&self) -> ToolName {
        ToolName::KnowledgeInsight
    }

    #[instrument(skip(self, query))]
    async fn run(&self, query: &str) -> Result<ToolOutput> {
        let retrieval = self.retriever.query(query, self.top_k).await;

        if retrieval.degraded {
            return Err(AppError::IndexUnavailable {
                message: "retrieval returned degraded result".into(),
            });
        }

        let evidence = if retrieval.snippets.is_empty() {
            "No matching documents were found in the knowledge base.".to_string()
        } else {
            retrieval
                .snippets
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    format!("Source {} ({}, score {:.2}):\n{}", i + 1, s.document_ref, s.score, s.snippet)
                })
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        Ok(ToolOutput {
            payload: serde_json::to_value(&retrieval.snippets)?,
            evidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{Retrieval, Snippet};

    struct FixedRetriever {
        retrieval: Retrieval,
    }

    #[async_trait]
    impl KnowledgeRetriever for FixedRetriever {
        async fn query(&self, _text: &str, _k: usize) -> Retrieval {
            self.retrieval.clone()
        }
    }

    #[tokio::test]
    async fn test_snippets_become_numbered_sources() {
        let tool = KnowledgeInsightTool::new(
            Arc::new(FixedRetriever {
                retrieval: Retrieval {
                    snippets: vec![
                        Snippet {
                            document_ref: "case/2025/01/a-c1.json".into(),
                            score: 0.91,
                            snippet: "Throttling resolved by raising limits".into(),
                        },
                        Snippet {
                            document_ref: "case/2025/01/a-c2.json".into(),
                            score: 0.74,
                            snippet: "Similar latency incident".into(),
                        },
                    ],
                    degraded: false,
                },
            }),
            5,
        );

        let output = tool.run("throttling").await.unwrap();
        assert!(output.evidence.contains("Source 1"));
        assert!(output.evidence.contains("Source 2"));
        assert!(output.evidence.contains("Throttling resolved"));
    }

    #[tokio::test]
    async fn test_degraded_retrieval_fails_the_tool() {
        let tool = KnowledgeInsightTool::new(
            Arc::new(FixedRetriever {
                retrieval: Retrieval { snippets: vec![], degraded: true },
            }),
            5,
        );

        let err = tool.run("anything").await.unwrap_err();
        assert!(matches!(err, AppError::IndexUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_empty_but_healthy_retrieval_succeeds() {
        let tool = KnowledgeInsightTool::new(
            Arc::new(FixedRetriever {
                retrieval: Retrieval { snippets: vec![], degraded: false },
            }),
            5,
        );

        let output = tool.run("nothing matches this").await.unwrap();
        assert!(output.evidence.contains("No matching documents"));
    }
}
