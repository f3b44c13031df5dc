// Persistent and transient domain records: Container, Image, Session, Agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A container groups images. Destroying a container destroys its in-memory
/// agents; images survive (they are persistent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub container_id: String,
    pub created_at: DateTime<Utc>,
}

impl ContainerRecord {
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Per-image runtime metadata that is not part of the user-facing config,
/// e.g. the upstream LLM SDK session id to resume on restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageMetadata {
    #[serde(default)]
    pub resume_session_id: Option<String>,
}

/// User-supplied configuration merged with `default_agent` at creation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageConfig {
    pub name: Option<String>,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub mcp_servers: serde_json::Value,
}

/// A persistent conversation. Exactly one session per image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_id: Uuid,
    pub container_id: String,
    pub session_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub mcp_servers: serde_json::Value,
    #[serde(default)]
    pub metadata: ImageMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn new(container_id: impl Into<String>, config: ImageConfig) -> Self {
        let now = Utc::now();
        Self {
            image_id: Uuid::now_v7(),
            container_id: container_id.into(),
            session_id: Uuid::now_v7(),
            name: config.name.unwrap_or_else(|| "untitled".to_string()),
            description: config.description,
            system_prompt: config.system_prompt,
            mcp_servers: config.mcp_servers,
            metadata: ImageMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A session is the message log attached to an image. The message list
/// itself lives in the persistence driver; this record only tracks identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub image_id: Uuid,
    pub container_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(session_id: Uuid, image_id: Uuid, container_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            image_id,
            container_id: container_id.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lifecycle of a transient runtime agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLifecycle {
    Running,
    Stopped,
    Destroyed,
}

/// A transient runtime instance bound to exactly one image at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: Uuid,
    pub image_id: Uuid,
    pub container_id: String,
    pub created_at: DateTime<Utc>,
    pub lifecycle: AgentLifecycle,
}

impl AgentRecord {
    pub fn new(image_id: Uuid, container_id: impl Into<String>) -> Self {
        Self {
            agent_id: Uuid::now_v7(),
            image_id,
            container_id: container_id.into(),
            created_at: Utc::now(),
            lifecycle: AgentLifecycle::Running,
        }
    }
}

/// Extra opaque passthrough carried on an image but not interpreted by the
/// runtime core (e.g. MCP server configuration blobs).
pub type Passthrough = HashMap<String, serde_json::Value>;
