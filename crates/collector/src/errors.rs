//! Collector error types

use caselake_common::errors::AppError;

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Provider outage: all {attempted} requests in the batch failed")]
    ProviderOutage { attempted: usize },

    #[error("Lake error: {0}")]
    Lake(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<AppError> for CollectorError {
    fn from(e: AppError) -> Self {
        match e {
            AppError::Checkpoint { message } => CollectorError::Checkpoint(message),
            AppError::QueueError { message } => CollectorError::Queue(message),
            other => CollectorError::Lake(other.to_string()),
        }
    }
}
