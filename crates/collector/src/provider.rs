//! Case-management provider client
//!
//! Fetches raw entity payloads page by page. Transient failures (throttling,
//! network blips, 5xx) are retried with exponential backoff inside the
//! client; anything else is permanent and surfaces to the caller, which
//! decides whether to skip the entity or escalate.

use async_trait::async_trait;
use backoff::{future::retry, Error as BackoffError, ExponentialBackoffBuilder};
use caselake_common::config::ProviderConfig;
use caselake_common::queue::EntityRef;
use caselake_common::records::EntityKind;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Rate limiting, network blip, 5xx: worth retrying
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// Malformed or unauthorized: retrying will not help
    #[error("Permanent provider error: {0}")]
    Permanent(String),
}

/// One page of raw entity payloads
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<serde_json::Value>,
    pub next_token: Option<String>,
}

/// Access to the provider API, one page at a time
#[async_trait]
pub trait SupportProvider: Send + Sync {
    /// Fetch a page of entities of `kind` updated after `updated_after`
    async fn fetch_page(
        &self,
        kind: EntityKind,
        updated_after: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> Result<Page, ProviderError>;

    /// Fetch exactly one entity, or None if the provider no longer knows it
    async fn fetch_one(&self, entity: &EntityRef) -> Result<Option<serde_json::Value>, ProviderError>;
}

/// HTTP provider client
pub struct HttpSupportProvider {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    page_size: u32,
    retry_budget: Duration,
}

#[derive(Deserialize)]
struct PageResponse {
    #[serde(default)]
    items: Vec<serde_json::Value>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct OneResponse {
    item: Option<serde_json::Value>,
}

impl HttpSupportProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Permanent(format!("Failed to create HTTP client: {}", e)))?;

        // Retry budget grows with the configured attempt count
        let retry_budget = Duration::from_millis(250 * (1u64 << config.max_retries.min(8)));

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            page_size: config.page_size,
            retry_budget,
        })
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url);
        if let Some(token) = &self.api_token {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: String) -> Result<T, ProviderError> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(250))
            .with_max_interval(Duration::from_secs(5))
            .with_max_elapsed_time(Some(self.retry_budget))
            .build();

        retry(policy, || {
            let url = url.clone();
            async move {
                let response = self
                    .request(&url)
                    .send()
                    .await
                    .map_err(|e| BackoffError::transient(ProviderError::Transient(e.to_string())))?;

                let status = response.status();
                if status.is_success() {
                    response
                        .json::<T>()
                        .await
                        .map_err(|e| {
                            BackoffError::permanent(ProviderError::Permanent(format!(
                                "Malformed response body: {}",
                                e
                            )))
                        })
                } else if status.as_u16() == 429 || status.is_server_error() {
                    warn!(url = %url, status = status.as_u16(), "Provider request throttled/failed, retrying");
                    Err(BackoffError::transient(ProviderError::Transient(format!(
                        "HTTP {}",
                        status
                    ))))
                } else {
                    Err(BackoffError::permanent(ProviderError::Permanent(format!(
                        "HTTP {}",
                        status
                    ))))
                }
            }
        })
        .await
    }
}

#[async_trait]
impl SupportProvider for HttpSupportProvider {
    async fn fetch_page(
        &self,
        kind: EntityKind,
        updated_after: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> Result<Page, ProviderError> {
        let mut url = format!(
            "{}/v1/{}?updated_after={}&page_size={}",
            self.base_url,
            kind.prefix(),
            updated_after.to_rfc3339(),
            self.page_size,
        );
        if let Some(token) = page_token {
            url.push_str("&page_token=");
            url.push_str(token);
        }

        let response: PageResponse = self.get_json(url).await?;
        Ok(Page {
            items: response.items,
            next_token: response.next_page_token,
        })
    }

    async fn fetch_one(&self, entity: &EntityRef) -> Result<Option<serde_json::Value>, ProviderError> {
        let url = format!(
            "{}/v1/{}/{}/{}",
            self.base_url,
            entity.entity_type.prefix(),
            entity.account_id,
            entity.entity_id,
        );

        let response: OneResponse = self.get_json(url).await?;
        Ok(response.item)
    }
}
