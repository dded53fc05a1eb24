//! Configuration management for Caselake services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration (gateway)
    pub server: ServerConfig,

    /// Metadata database configuration
    pub database: DatabaseConfig,

    /// Lake object store configuration
    pub lake: LakeConfig,

    /// Case-management provider configuration
    pub provider: ProviderConfig,

    /// Queue configuration (SQS)
    pub queue: QueueConfig,

    /// Analytic query engine configuration
    pub query_engine: QueryEngineConfig,

    /// Knowledge index configuration
    pub knowledge: KnowledgeConfig,

    /// Generative backend configuration
    pub llm: LlmConfig,

    /// Tool dispatch and composition configuration
    pub orchestrator: OrchestratorConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LakeConfig {
    /// Root of the lake object store. Local path for the filesystem store.
    #[serde(default = "default_lake_root")]
    pub root: String,

    /// Logical bucket/namespace name carried in trigger payloads
    #[serde(default = "default_bucket_name")]
    pub bucket_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Base URL of the case-management provider API
    #[serde(default = "default_provider_base")]
    pub base_url: String,

    /// API token (optional; unset means unauthenticated/dev endpoint)
    pub api_token: Option<String>,

    /// Page size for paginated fetches
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries for transient failures
    #[serde(default = "default_provider_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Sync trigger queue URL (consumed by the collector)
    pub trigger_queue_url: Option<String>,

    /// Object-written event queue URL (consumed by the metadata worker)
    pub object_event_queue_url: Option<String>,

    /// Dead letter queue URL
    pub dlq_url: Option<String>,

    /// Maximum messages to receive per poll
    #[serde(default = "default_queue_batch_size")]
    pub batch_size: u32,

    /// Long polling timeout in seconds
    #[serde(default = "default_queue_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Visibility timeout in seconds
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryEngineConfig {
    /// Base URL of the analytic query service
    #[serde(default = "default_query_engine_base")]
    pub base_url: String,

    /// Maximum wall-clock seconds a submitted query may run
    #[serde(default = "default_max_query_execution_time")]
    pub max_execution_secs: u64,

    /// Initial poll interval in seconds
    #[serde(default = "default_poll_initial")]
    pub poll_initial_secs: u64,

    /// Poll interval cap in seconds
    #[serde(default = "default_poll_cap")]
    pub poll_cap_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KnowledgeConfig {
    /// Base URL of the knowledge index service
    #[serde(default = "default_knowledge_base")]
    pub base_url: String,

    /// Number of snippets to retrieve per query
    #[serde(default = "default_knowledge_top_k")]
    pub top_k: usize,

    /// Request timeout in seconds
    #[serde(default = "default_knowledge_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Completion endpoint
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// API key (unset enables the deterministic dev/test backend)
    pub api_key: Option<String>,

    /// Model used for answer composition
    #[serde(default = "default_answer_model")]
    pub answer_model: String,

    /// Specialized sub-model for SQL generation
    #[serde(default = "default_sql_model")]
    pub sql_model: String,

    /// Specialized sub-model for advisory analysis
    #[serde(default = "default_advisory_model")]
    pub advisory_model: String,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// Concurrency bound for tool execution
    #[serde(default = "default_max_parallel_tools")]
    pub max_parallel_tools: usize,

    /// Per-tool deadline in seconds
    #[serde(default = "default_tool_deadline")]
    pub tool_deadline_secs: u64,

    /// Outer deadline for a whole dispatch in seconds
    #[serde(default = "default_dispatch_deadline")]
    pub dispatch_deadline_secs: u64,

    /// Token budget for the composed context
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 20 }
fn default_connect_timeout() -> u64 { 10 }
fn default_lake_root() -> String { "./lake".to_string() }
fn default_bucket_name() -> String { "caselake".to_string() }
fn default_provider_base() -> String { "http://localhost:9400".to_string() }
fn default_page_size() -> u32 { 100 }
fn default_provider_timeout() -> u64 { 30 }
fn default_provider_retries() -> u32 { 3 }
fn default_queue_batch_size() -> u32 { 10 }
fn default_queue_poll_timeout() -> u64 { 20 }
fn default_visibility_timeout() -> u64 { 300 }
fn default_query_engine_base() -> String { "http://localhost:9401".to_string() }
fn default_max_query_execution_time() -> u64 { 300 }
fn default_poll_initial() -> u64 { 1 }
fn default_poll_cap() -> u64 { 10 }
fn default_knowledge_base() -> String { "http://localhost:9402".to_string() }
fn default_knowledge_top_k() -> usize { 5 }
fn default_knowledge_timeout() -> u64 { 10 }
fn default_llm_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_answer_model() -> String { "gpt-4o-mini".to_string() }
fn default_sql_model() -> String { "gpt-4o-mini".to_string() }
fn default_advisory_model() -> String { "gpt-4o-mini".to_string() }
fn default_llm_timeout() -> u64 { 30 }
fn default_max_parallel_tools() -> usize { 3 }
fn default_tool_deadline() -> u64 { 310 }
fn default_dispatch_deadline() -> u64 { 330 }
fn default_max_tokens() -> usize { 4000 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "caselake".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("database.url", "postgres://localhost/caselake")?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__ORCHESTRATOR__MAX_PARALLEL_TOOLS=4
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get the outer dispatch deadline as Duration
    pub fn dispatch_deadline(&self) -> Duration {
        Duration::from_secs(self.orchestrator.dispatch_deadline_secs)
    }

    /// Get the per-tool deadline as Duration
    pub fn tool_deadline(&self) -> Duration {
        Duration::from_secs(self.orchestrator.tool_deadline_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/caselake".to_string(),
                max_connections: default_max_connections(),
                connect_timeout_secs: default_connect_timeout(),
            },
            lake: LakeConfig {
                root: default_lake_root(),
                bucket_name: default_bucket_name(),
            },
            provider: ProviderConfig {
                base_url: default_provider_base(),
                api_token: None,
                page_size: default_page_size(),
                timeout_secs: default_provider_timeout(),
                max_retries: default_provider_retries(),
            },
            queue: QueueConfig {
                trigger_queue_url: None,
                object_event_queue_url: None,
                dlq_url: None,
                batch_size: default_queue_batch_size(),
                poll_timeout_secs: default_queue_poll_timeout(),
                visibility_timeout_secs: default_visibility_timeout(),
            },
            query_engine: QueryEngineConfig {
                base_url: default_query_engine_base(),
                max_execution_secs: default_max_query_execution_time(),
                poll_initial_secs: default_poll_initial(),
                poll_cap_secs: default_poll_cap(),
            },
            knowledge: KnowledgeConfig {
                base_url: default_knowledge_base(),
                top_k: default_knowledge_top_k(),
                timeout_secs: default_knowledge_timeout(),
            },
            llm: LlmConfig {
                endpoint: default_llm_endpoint(),
                api_key: None,
                answer_model: default_answer_model(),
                sql_model: default_sql_model(),
                advisory_model: default_advisory_model(),
                timeout_secs: default_llm_timeout(),
            },
            orchestrator: OrchestratorConfig {
                max_parallel_tools: default_max_parallel_tools(),
                tool_deadline_secs: default_tool_deadline(),
                dispatch_deadline_secs: default_dispatch_deadline(),
                max_tokens: default_max_tokens(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                metrics_port: default_metrics_port(),
                service_name: default_service_name(),
            },
            rate_limit: RateLimitConfig {
                requests_per_second: default_rate_limit(),
                burst: default_burst(),
                enabled: default_enabled(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.orchestrator.max_parallel_tools, 3);
        assert_eq!(config.query_engine.max_execution_secs, 300);
    }

    #[test]
    fn test_deadline_durations() {
        let config = AppConfig::default();
        assert!(config.dispatch_deadline() > config.tool_deadline());
    }
}
