mod gateway;
mod provider;

pub use gateway::{AgentGateway, GatewaySettings};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One finished message in a session's history. Immutable once appended;
/// ordering is insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_context: Option<serde_json::Value>,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>, json_context: Option<serde_json::Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            json_context,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            json_context: None,
        }
    }
}

/// Outcome of a connection probe. Failures are data, not errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionReport {
    pub success: bool,
    pub message: String,
}

/// One chat turn as received by the proxy endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub message: String,
    #[serde(default)]
    pub json_context: Option<serde_json::Value>,
    /// Accepted for API compatibility; not replayed into the provider
    /// thread (each run is seeded with the single user message).
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

/// What a gateway turn emits, in order: zero or more chunks, then exactly
/// one completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    Chunk(String),
    Complete,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("agent service is not configured (set the endpoint and agent id)")]
    NotConfigured,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
