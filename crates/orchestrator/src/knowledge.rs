//! Knowledge retriever
//!
//! Semantic search over the indexed case content. Retrieval is finite and
//! non-restartable per call; an unavailable index yields an empty result set
//! with the `degraded` flag rather than an error, so callers can treat
//! knowledge evidence as optional.

use async_trait::async_trait;
use caselake_common::config::KnowledgeConfig;
use caselake_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// One retrieved snippet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    pub document_ref: String,
    pub score: f64,
    pub snippet: String,
}

/// Result of one retrieval call
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub snippets: Vec<Snippet>,
    /// True when the index could not be reached; snippets will be empty
    pub degraded: bool,
}

/// Semantic search over the case index
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// Retrieve up to `k` snippets relevant to `text`, best-effort
    async fn query(&self, text: &str, k: usize) -> Retrieval;
}

/// HTTP client for the knowledge index service
pub struct HttpKnowledgeRetriever {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct RetrieveRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    results: Vec<Snippet>,
}

impl HttpKnowledgeRetriever {
    pub fn new(config: &KnowledgeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn try_query(&self, text: &str, k: usize) -> Result<Vec<Snippet>> {
        let response = self
            .client
            .post(format!("{}/v1/retrieve", self.base_url))
            .json(&RetrieveRequest { query: text, top_k: k })
            .send()
            .await?
            .error_for_status()
            .map_err(|e| AppError::IndexUnavailable {
                message: e.to_string(),
            })?;

        let body: RetrieveResponse = response.json().await?;
        Ok(body.results.into_iter().take(k).collect())
    }
}

#[async_trait]
impl KnowledgeRetriever for HttpKnowledgeRetriever {
    async fn query(&self, text: &str, k: usize) -> Retrieval {
        match self.try_query(text, k).await {
            Ok(snippets) => Retrieval { snippets, degraded: false },
            Err(e) => {
                warn!(error = %e, "Knowledge retrieval degraded");
                Retrieval { snippets: vec![], degraded: true }
            }
        }
    }
}
