//! Caselake Common Library
//!
//! Shared code for all Caselake services including:
//! - Canonical entity records and lake key conventions
//! - Lake object store abstraction (capability handles)
//! - Metadata table access
//! - Error types and handling
//! - Configuration management
//! - Queue integration for sync triggers and object events
//! - Generative backend client
//! - Metrics and observability

pub mod config;
pub mod db;
pub mod errors;
pub mod lake;
pub mod llm;
pub mod metrics;
pub mod queue;
pub mod records;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use lake::{ObjectReader, ObjectWriter};
pub use records::{CaseRecord, CheckResult, EntityKind, HealthEvent, SyncCheckpoint};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
