//! Chat query handler
//!
//! One request per question: validate and sanitize the input, plan the
//! candidate tool set, dispatch, compose, respond. Partial tool failure
//! still yields a best-effort answer; only a generative backend failure
//! fails the request.

use axum::{extract::State, Json};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use caselake_common::errors::{AppError, Result};
use caselake_common::metrics::RequestMetrics;
use caselake_orchestrator::tools::Tool;
use caselake_orchestrator::{plan_tools, AgentSession};

/// Maximum accepted query length in characters
const MAX_QUERY_CHARS: usize = 2000;

/// Chat query request
#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub query: String,

    /// Session identifier; generated when the front end sends none
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Chat query response
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
}

/// Answer one chat query
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    let start = Instant::now();
    let metrics = RequestMetrics::start("POST", "/v1/chat");

    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
    })?;
    let query = sanitize_query(&request.query)?;
    let session_id = request
        .session_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    // Intent planning, restricted to the tools this process has wired up
    let candidates: Vec<Arc<dyn Tool>> = plan_tools(&query)
        .into_iter()
        .filter_map(|name| state.tools.get(&name).cloned())
        .collect();

    tracing::info!(
        session_id = %session_id,
        candidates = candidates.len(),
        "Dispatching chat query"
    );

    let outcome = state.dispatcher.dispatch(&query, candidates).await;

    let mut session = AgentSession::new(session_id.clone());
    let answer = state.composer.compose(&mut session, &query, &outcome).await;

    match answer {
        Ok(response) => {
            metrics.finish(200);
            tracing::info!(
                session_id = %session_id,
                degraded = outcome.degraded,
                latency_ms = start.elapsed().as_millis() as u64,
                "Chat query answered"
            );
            Ok(Json(ChatResponse { response, session_id }))
        }
        Err(e) => {
            metrics.finish(e.status_code().as_u16());
            Err(e)
        }
    }
}

/// Validate and sanitize user input.
///
/// Control characters are stripped; over-long or injection-shaped input is
/// rejected outright.
pub fn sanitize_query(raw: &str) -> Result<String> {
    if raw.trim().is_empty() {
        return Err(AppError::MissingQuery);
    }

    if raw.chars().count() > MAX_QUERY_CHARS {
        return Err(AppError::InvalidInput {
            message: format!("query exceeds maximum length of {} characters", MAX_QUERY_CHARS),
        });
    }

    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    for pattern in dangerous_patterns() {
        if pattern.is_match(&cleaned) {
            return Err(AppError::InvalidInput {
                message: "query contains potentially malicious content".into(),
            });
        }
    }

    Ok(cleaned.trim().to_string())
}

fn dangerous_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?is)<script[^>]*>.*?</script>",
            r"(?i)javascript:",
            r"(?i)on\w+\s*=",
            r"\$\{.*?\}",
            r"(?i)eval\s*\(",
            r"(?i)exec\s*\(",
            r"(?i)__import__\s*\(",
            r"(?i)subprocess\.",
            r"(?i)system\s*\(",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static pattern"))
        .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_is_rejected() {
        assert!(matches!(sanitize_query(""), Err(AppError::MissingQuery)));
        assert!(matches!(sanitize_query("   "), Err(AppError::MissingQuery)));
    }

    #[test]
    fn test_over_long_query_is_rejected() {
        let long = "a".repeat(MAX_QUERY_CHARS + 1);
        assert!(matches!(
            sanitize_query(&long),
            Err(AppError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_control_characters_are_stripped() {
        let out = sanitize_query("count\u{0000} of \u{0007}cases").unwrap();
        assert_eq!(out, "count of cases");
    }

    #[test]
    fn test_script_injection_is_rejected() {
        let err = sanitize_query("<script>alert(1)</script> how many cases?").unwrap_err();
        assert!(matches!(err, AppError::InvalidInput { .. }));
    }

    #[test]
    fn test_template_injection_is_rejected() {
        assert!(sanitize_query("show ${secrets}").is_err());
        assert!(sanitize_query("eval (payload)").is_err());
    }

    #[test]
    fn test_ordinary_question_passes_through() {
        let out = sanitize_query("Total count of support cases in jan 2025").unwrap();
        assert_eq!(out, "Total count of support cases in jan 2025");
    }
}
