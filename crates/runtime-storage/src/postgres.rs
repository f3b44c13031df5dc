// Postgres-backed PersistenceDriver, grounded on the teacher's repository
// layer style (raw `sqlx::query_as` with RETURNING, no query builder).
// Schema is managed externally, same as the teacher's storage crate - no
// migrations directory ships with this crate.

use async_trait::async_trait;
use runtime_contracts::{ContainerRecord, ImageMetadata, ImageRecord, Message, SessionRecord};
use sqlx::PgPool;
use uuid::Uuid;

use runtime_core::error::{Result, RuntimeError};
use runtime_core::persistence::PersistenceDriver;

use crate::models::{ContainerRow, ImageRow, MessageRow, SessionRow};

#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| RuntimeError::persistence(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_image(row: ImageRow) -> Result<ImageRecord> {
    let metadata: ImageMetadata =
        serde_json::from_value(row.metadata).map_err(|e| RuntimeError::persistence(e.to_string()))?;
    Ok(ImageRecord {
        image_id: row.image_id,
        container_id: row.container_id,
        session_id: row.session_id,
        name: row.name,
        description: row.description,
        system_prompt: row.system_prompt,
        mcp_servers: row.mcp_servers,
        metadata,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

#[async_trait]
impl PersistenceDriver for PostgresPersistence {
    async fn save_container(&self, container: ContainerRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO containers (container_id, created_at)
            VALUES ($1, $2)
            ON CONFLICT (container_id) DO NOTHING
            "#,
        )
        .bind(&container.container_id)
        .bind(container.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::persistence(e.to_string()))?;
        Ok(())
    }

    async fn find_container_by_id(&self, container_id: &str) -> Result<Option<ContainerRecord>> {
        let row = sqlx::query_as::<_, ContainerRow>(
            "SELECT container_id, created_at FROM containers WHERE container_id = $1",
        )
        .bind(container_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RuntimeError::persistence(e.to_string()))?;
        Ok(row.map(|r| ContainerRecord {
            container_id: r.container_id,
            created_at: r.created_at,
        }))
    }

    async fn create_image(&self, image: ImageRecord, session: SessionRecord) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| RuntimeError::persistence(e.to_string()))?;

        let metadata_json =
            serde_json::to_value(&image.metadata).map_err(|e| RuntimeError::persistence(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO images
                (image_id, container_id, session_id, name, description, system_prompt, mcp_servers, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(image.image_id)
        .bind(&image.container_id)
        .bind(image.session_id)
        .bind(&image.name)
        .bind(&image.description)
        .bind(&image.system_prompt)
        .bind(&image.mcp_servers)
        .bind(&metadata_json)
        .bind(image.created_at)
        .bind(image.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| RuntimeError::persistence(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, image_id, container_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(session.session_id)
        .bind(session.image_id)
        .bind(&session.container_id)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| RuntimeError::persistence(e.to_string()))?;

        tx.commit().await.map_err(|e| RuntimeError::persistence(e.to_string()))?;
        Ok(())
    }

    async fn find_image_by_id(&self, image_id: Uuid) -> Result<Option<ImageRecord>> {
        let row = sqlx::query_as::<_, ImageRow>(
            r#"
            SELECT image_id, container_id, session_id, name, description, system_prompt, mcp_servers, metadata, created_at, updated_at
            FROM images WHERE image_id = $1
            "#,
        )
        .bind(image_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RuntimeError::persistence(e.to_string()))?;
        row.map(row_to_image).transpose()
    }

    async fn find_images_by_container_id(&self, container_id: &str) -> Result<Vec<ImageRecord>> {
        let rows = sqlx::query_as::<_, ImageRow>(
            r#"
            SELECT image_id, container_id, session_id, name, description, system_prompt, mcp_servers, metadata, created_at, updated_at
            FROM images WHERE container_id = $1 ORDER BY created_at
            "#,
        )
        .bind(container_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RuntimeError::persistence(e.to_string()))?;
        rows.into_iter().map(row_to_image).collect()
    }

    async fn find_all_images(&self) -> Result<Vec<ImageRecord>> {
        let rows = sqlx::query_as::<_, ImageRow>(
            r#"
            SELECT image_id, container_id, session_id, name, description, system_prompt, mcp_servers, metadata, created_at, updated_at
            FROM images ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RuntimeError::persistence(e.to_string()))?;
        rows.into_iter().map(row_to_image).collect()
    }

    async fn update_image(&self, image: ImageRecord) -> Result<()> {
        let metadata_json =
            serde_json::to_value(&image.metadata).map_err(|e| RuntimeError::persistence(e.to_string()))?;
        sqlx::query(
            r#"
            UPDATE images
            SET name = $2, description = $3, system_prompt = $4, mcp_servers = $5, metadata = $6, updated_at = NOW()
            WHERE image_id = $1
            "#,
        )
        .bind(image.image_id)
        .bind(&image.name)
        .bind(&image.description)
        .bind(&image.system_prompt)
        .bind(&image.mcp_servers)
        .bind(&metadata_json)
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::persistence(e.to_string()))?;
        Ok(())
    }

    async fn update_image_metadata(&self, image_id: Uuid, metadata: ImageMetadata) -> Result<()> {
        let metadata_json = serde_json::to_value(&metadata).map_err(|e| RuntimeError::persistence(e.to_string()))?;
        sqlx::query("UPDATE images SET metadata = $2, updated_at = NOW() WHERE image_id = $1")
            .bind(image_id)
            .bind(&metadata_json)
            .execute(&self.pool)
            .await
            .map_err(|e| RuntimeError::persistence(e.to_string()))?;
        Ok(())
    }

    async fn delete_image(&self, image_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| RuntimeError::persistence(e.to_string()))?;
        let session_id: Option<Uuid> = sqlx::query_scalar("SELECT session_id FROM images WHERE image_id = $1")
            .bind(image_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| RuntimeError::persistence(e.to_string()))?;

        if let Some(session_id) = session_id {
            sqlx::query("DELETE FROM messages WHERE session_id = $1")
                .bind(session_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| RuntimeError::persistence(e.to_string()))?;
            sqlx::query("DELETE FROM sessions WHERE session_id = $1")
                .bind(session_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| RuntimeError::persistence(e.to_string()))?;
        }
        sqlx::query("DELETE FROM images WHERE image_id = $1")
            .bind(image_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RuntimeError::persistence(e.to_string()))?;

        tx.commit().await.map_err(|e| RuntimeError::persistence(e.to_string()))?;
        Ok(())
    }

    async fn find_session_by_id(&self, session_id: Uuid) -> Result<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT session_id, image_id, container_id, created_at, updated_at FROM sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RuntimeError::persistence(e.to_string()))?;
        Ok(row.map(|r| SessionRecord {
            session_id: r.session_id,
            image_id: r.image_id,
            container_id: r.container_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }))
    }

    async fn add_message(&self, message: Message) -> Result<()> {
        let content_json = serde_json::to_value(&message.content).map_err(|e| RuntimeError::persistence(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO messages (id, session_id, content, parent_id, timestamp)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(message.id)
        .bind(message.session_id)
        .bind(&content_json)
        .bind(message.parent_id)
        .bind(message.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::persistence(e.to_string()))?;
        Ok(())
    }

    async fn get_messages(&self, session_id: Uuid) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, session_id, content, parent_id, timestamp FROM messages WHERE session_id = $1 ORDER BY timestamp",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RuntimeError::persistence(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let content = serde_json::from_value(row.content).map_err(|e| RuntimeError::persistence(e.to_string()))?;
                Ok(Message {
                    id: row.id,
                    session_id: row.session_id,
                    content,
                    parent_id: row.parent_id,
                    timestamp: row.timestamp,
                })
            })
            .collect()
    }

    async fn clear_messages(&self, session_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM messages WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RuntimeError::persistence(e.to_string()))?;
        Ok(())
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM messages WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RuntimeError::persistence(e.to_string()))?;
        sqlx::query("DELETE FROM sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RuntimeError::persistence(e.to_string()))?;
        Ok(())
    }
}
