//! SQS queue integration
//!
//! Carries the two message flows between services:
//! - sync trigger messages (timer / provider change-event → collector)
//! - object-written events (collector → metadata worker)

use crate::errors::{AppError, Result};
use crate::records::EntityKind;
use aws_sdk_sqs::types::Message;
use aws_sdk_sqs::Client as SqsClient;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

/// SQS queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue URL
    pub url: String,
    /// Dead letter queue URL (optional)
    pub dlq_url: Option<String>,
    /// Visibility timeout in seconds
    pub visibility_timeout: i32,
    /// Wait time for long polling (seconds)
    pub wait_time_seconds: i32,
    /// Maximum number of messages per poll
    pub max_messages: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            dlq_url: None,
            visibility_timeout: 300,
            wait_time_seconds: 20,
            max_messages: 10,
        }
    }
}

/// SQS queue client wrapper
pub struct Queue {
    client: SqsClient,
    config: QueueConfig,
}

impl Queue {
    /// Create a new queue client
    pub async fn new(config: QueueConfig) -> Result<Self> {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = SqsClient::new(&aws_config);

        Ok(Self { client, config })
    }

    /// Create with existing AWS config
    pub fn with_client(client: SqsClient, config: QueueConfig) -> Self {
        Self { client, config }
    }

    /// Send a message to the queue
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<String> {
        let body = serde_json::to_string(message)?;

        let result = self
            .client
            .send_message()
            .queue_url(&self.config.url)
            .message_body(&body)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to send message: {}", e),
            })?;

        let message_id = result.message_id.unwrap_or_default();
        debug!(message_id = %message_id, "Message sent to queue");

        Ok(message_id)
    }

    /// Receive raw messages from the queue
    pub async fn receive(&self) -> Result<Vec<Message>> {
        let result = self
            .client
            .receive_message()
            .queue_url(&self.config.url)
            .max_number_of_messages(self.config.max_messages)
            .visibility_timeout(self.config.visibility_timeout)
            .wait_time_seconds(self.config.wait_time_seconds)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to receive messages: {}", e),
            })?;

        let messages = result.messages.unwrap_or_default();
        debug!(count = messages.len(), "Received messages from queue");

        Ok(messages)
    }

    /// Receive and deserialize messages, paired with their receipt handles.
    /// Unparseable messages are logged and dropped (they will expire to the
    /// DLQ after redelivery).
    pub async fn receive_parsed<T: DeserializeOwned>(&self) -> Result<Vec<(T, String)>> {
        let mut parsed = Vec::new();
        for message in self.receive().await? {
            let Some(receipt) = message.receipt_handle.clone() else {
                continue;
            };
            match Self::parse_message(&message) {
                Ok(value) => parsed.push((value, receipt)),
                Err(e) => {
                    warn!(error = %e, "Dropping unparseable queue message");
                }
            }
        }
        Ok(parsed)
    }

    /// Delete a message after processing
    pub async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.config.url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to delete message: {}", e),
            })?;

        debug!("Message deleted from queue");
        Ok(())
    }

    /// Parse message body as JSON
    pub fn parse_message<T: DeserializeOwned>(message: &Message) -> Result<T> {
        let body = message.body.as_ref().ok_or_else(|| AppError::QueueError {
            message: "Message has no body".to_string(),
        })?;

        serde_json::from_str(body).map_err(|e| AppError::QueueError {
            message: format!("Failed to parse message: {}", e),
        })
    }
}

/// Reference to a single entity, carried by realtime triggers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityKind,
    pub account_id: String,
    pub entity_id: String,
}

/// Inbound sync trigger payload.
///
/// Batch triggers carry a window and selection flags; realtime triggers carry
/// an explicit entity reference. The flag set is always explicit input;
/// absent flags default to `case` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTriggerMessage {
    #[serde(default)]
    pub past_no_of_days: Option<i64>,

    #[serde(default)]
    pub bucket_name: Option<String>,

    #[serde(default = "default_case_flag")]
    pub case: bool,

    #[serde(default)]
    pub health: bool,

    #[serde(default)]
    pub ta: bool,

    /// Present only on realtime per-entity triggers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityRef>,
}

fn default_case_flag() -> bool {
    true
}

/// Event emitted by the collector once a lake object is durably written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectWrittenEvent {
    pub object_key: String,
    pub entity_type: EntityKind,
    pub account_id: String,
    pub entity_id: String,
    pub written_at: DateTime<Utc>,
}
