// In-memory PersistenceDriver, grounded on the teacher's in-memory test
// doubles: plain `RwLock<HashMap<..>>` maps, no eviction. Intended for
// local development and tests, not production durability.

use std::collections::HashMap;

use async_trait::async_trait;
use runtime_contracts::{ContainerRecord, ImageMetadata, ImageRecord, Message, SessionRecord};
use tokio::sync::RwLock;
use uuid::Uuid;

use runtime_core::error::Result;
use runtime_core::persistence::PersistenceDriver;

#[derive(Default)]
pub struct InMemoryPersistence {
    containers: RwLock<HashMap<String, ContainerRecord>>,
    images: RwLock<HashMap<Uuid, ImageRecord>>,
    sessions: RwLock<HashMap<Uuid, SessionRecord>>,
    messages: RwLock<HashMap<Uuid, Vec<Message>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceDriver for InMemoryPersistence {
    async fn save_container(&self, container: ContainerRecord) -> Result<()> {
        self.containers.write().await.entry(container.container_id.clone()).or_insert(container);
        Ok(())
    }

    async fn find_container_by_id(&self, container_id: &str) -> Result<Option<ContainerRecord>> {
        Ok(self.containers.read().await.get(container_id).cloned())
    }

    async fn create_image(&self, image: ImageRecord, session: SessionRecord) -> Result<()> {
        self.images.write().await.insert(image.image_id, image);
        self.sessions.write().await.insert(session.session_id, session);
        Ok(())
    }

    async fn find_image_by_id(&self, image_id: Uuid) -> Result<Option<ImageRecord>> {
        Ok(self.images.read().await.get(&image_id).cloned())
    }

    async fn find_images_by_container_id(&self, container_id: &str) -> Result<Vec<ImageRecord>> {
        Ok(self
            .images
            .read()
            .await
            .values()
            .filter(|i| i.container_id == container_id)
            .cloned()
            .collect())
    }

    async fn find_all_images(&self) -> Result<Vec<ImageRecord>> {
        Ok(self.images.read().await.values().cloned().collect())
    }

    async fn update_image(&self, image: ImageRecord) -> Result<()> {
        self.images.write().await.insert(image.image_id, image);
        Ok(())
    }

    async fn update_image_metadata(&self, image_id: Uuid, metadata: ImageMetadata) -> Result<()> {
        if let Some(image) = self.images.write().await.get_mut(&image_id) {
            image.metadata = metadata;
            image.updated_at = chrono::Utc::now();
        }
        Ok(())
    }

    async fn delete_image(&self, image_id: Uuid) -> Result<()> {
        let session_id = self.images.read().await.get(&image_id).map(|i| i.session_id);
        if let Some(session_id) = session_id {
            self.messages.write().await.remove(&session_id);
            self.sessions.write().await.remove(&session_id);
        }
        self.images.write().await.remove(&image_id);
        Ok(())
    }

    async fn find_session_by_id(&self, session_id: Uuid) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.read().await.get(&session_id).cloned())
    }

    async fn add_message(&self, message: Message) -> Result<()> {
        self.messages.write().await.entry(message.session_id).or_default().push(message);
        Ok(())
    }

    async fn get_messages(&self, session_id: Uuid) -> Result<Vec<Message>> {
        Ok(self.messages.read().await.get(&session_id).cloned().unwrap_or_default())
    }

    async fn clear_messages(&self, session_id: Uuid) -> Result<()> {
        self.messages.write().await.remove(&session_id);
        Ok(())
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<()> {
        self.sessions.write().await.remove(&session_id);
        self.messages.write().await.remove(&session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_image_and_messages() {
        let store = InMemoryPersistence::new();
        let container_id = "c1";
        store.save_container(ContainerRecord::new(container_id)).await.unwrap();

        let config = runtime_contracts::ImageConfig::default();
        let image = ImageRecord::new(container_id, config);
        let session = SessionRecord::new(image.session_id, image.image_id, container_id);
        store.create_image(image.clone(), session).await.unwrap();

        let found = store.find_image_by_id(image.image_id).await.unwrap().unwrap();
        assert_eq!(found.container_id, container_id);

        store.add_message(Message::user(image.session_id, "hi")).await.unwrap();
        let messages = store.get_messages(image.session_id).await.unwrap();
        assert_eq!(messages.len(), 1);

        store.delete_image(image.image_id).await.unwrap();
        assert!(store.find_image_by_id(image.image_id).await.unwrap().is_none());
        assert!(store.get_messages(image.session_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn metadata_update_is_visible_on_next_read() {
        let store = InMemoryPersistence::new();
        let image = ImageRecord::new("c1", runtime_contracts::ImageConfig::default());
        let session = SessionRecord::new(image.session_id, image.image_id, "c1");
        store.create_image(image.clone(), session).await.unwrap();

        store
            .update_image_metadata(image.image_id, ImageMetadata { resume_session_id: Some("sdk-123".into()) })
            .await
            .unwrap();

        let found = store.find_image_by_id(image.image_id).await.unwrap().unwrap();
        assert_eq!(found.metadata.resume_session_id.as_deref(), Some("sdk-123"));
    }
}
