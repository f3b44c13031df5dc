// Database row shapes for the Postgres driver. Internal, may differ from
// the contracts crate's wire records - conversion happens at the query
// boundary in `postgres.rs`.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct ContainerRow {
    pub container_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ImageRow {
    pub image_id: Uuid,
    pub container_id: String,
    pub session_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub mcp_servers: sqlx::types::JsonValue,
    pub metadata: sqlx::types::JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub session_id: Uuid,
    pub image_id: Uuid,
    pub container_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub content: sqlx::types::JsonValue,
    pub parent_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}
