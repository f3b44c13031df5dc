// Persistence contract: the external driver the runtime core depends on for
// containers, images and session message logs. Concrete implementations live
// in runtime-storage (an in-memory reference store and a Postgres/sqlx store).

use async_trait::async_trait;
use runtime_contracts::{ContainerRecord, ImageMetadata, ImageRecord, Message, SessionRecord};
use uuid::Uuid;

use crate::error::Result;

#[async_trait]
pub trait PersistenceDriver: Send + Sync {
    async fn save_container(&self, container: ContainerRecord) -> Result<()>;
    async fn find_container_by_id(&self, container_id: &str) -> Result<Option<ContainerRecord>>;

    /// Persists an image and its session as a unit: a failure partway through
    /// must not leave one without the other. `PostgresPersistence` enforces
    /// this with a transaction; `InMemoryPersistence`'s inserts can't fail,
    /// so ordering is the only thing to get right there.
    async fn create_image(&self, image: ImageRecord, session: SessionRecord) -> Result<()>;
    async fn find_image_by_id(&self, image_id: Uuid) -> Result<Option<ImageRecord>>;
    async fn find_images_by_container_id(&self, container_id: &str) -> Result<Vec<ImageRecord>>;
    async fn find_all_images(&self) -> Result<Vec<ImageRecord>>;
    async fn update_image(&self, image: ImageRecord) -> Result<()>;
    async fn update_image_metadata(&self, image_id: Uuid, metadata: ImageMetadata) -> Result<()>;
    /// Deletes messages, then the session, then the image, in that order.
    async fn delete_image(&self, image_id: Uuid) -> Result<()>;

    async fn find_session_by_id(&self, session_id: Uuid) -> Result<Option<SessionRecord>>;
    async fn add_message(&self, message: Message) -> Result<()>;
    async fn get_messages(&self, session_id: Uuid) -> Result<Vec<Message>>;
    async fn clear_messages(&self, session_id: Uuid) -> Result<()>;
    async fn delete_session(&self, session_id: Uuid) -> Result<()>;
}
