// AgentInteractor: the inbound side of an agent. Persists user content and
// fires the internal trigger event that the Environment's effector picks up.
// Per the Interactor-only persistence decision (see DESIGN.md), the Presenter
// never writes `user_message` itself.

use std::sync::Arc;

use runtime_contracts::event::{EventCategory, EventContext, EventIntent, EventSource};
use runtime_contracts::{Message, SystemEvent};
use serde_json::json;
use uuid::Uuid;

use crate::bus::SystemBus;
use crate::error::Result;
use crate::persistence::PersistenceDriver;

pub struct AgentInteractor {
    bus: SystemBus,
    persistence: Arc<dyn PersistenceDriver>,
    context: EventContext,
    session_id: Uuid,
}

impl AgentInteractor {
    pub fn new(
        bus: SystemBus,
        persistence: Arc<dyn PersistenceDriver>,
        context: EventContext,
        session_id: Uuid,
    ) -> Self {
        Self {
            bus,
            persistence,
            context,
            session_id,
        }
    }

    /// Persists the user message, then emits the internal `user_message`
    /// trigger event (source=agent, intent=request) carrying `request_id`.
    pub async fn receive(&self, text: impl Into<String>, request_id: Uuid) -> Result<Uuid> {
        let text = text.into();
        let message = Message::user(self.session_id, text.clone());
        let message_id = message.id;
        self.persistence.add_message(message).await?;

        let event = SystemEvent::new(
            "user_message",
            EventSource::Agent,
            EventCategory::Message,
            EventIntent::Request,
            json!({"text": text, "message_id": message_id}),
        )
        .with_context(self.context.clone())
        .with_request_id(request_id);
        self.bus.emit(event).await;

        Ok(message_id)
    }

    pub async fn interrupt(&self, request_id: Option<Uuid>) {
        let mut event = SystemEvent::new(
            "interrupt",
            EventSource::Agent,
            EventCategory::Action,
            EventIntent::Request,
            json!({}),
        )
        .with_context(self.context.clone());
        event.request_id = request_id;
        self.bus.emit(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::PersistenceDriver;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    struct FakeStore {
        messages: RwLock<HashMap<Uuid, Vec<Message>>>,
    }

    #[async_trait::async_trait]
    impl PersistenceDriver for FakeStore {
        async fn save_container(&self, _c: runtime_contracts::ContainerRecord) -> Result<()> {
            Ok(())
        }
        async fn find_container_by_id(&self, _id: &str) -> Result<Option<runtime_contracts::ContainerRecord>> {
            Ok(None)
        }
        async fn create_image(
            &self,
            _i: runtime_contracts::ImageRecord,
            _s: runtime_contracts::SessionRecord,
        ) -> Result<()> {
            Ok(())
        }
        async fn find_image_by_id(&self, _id: Uuid) -> Result<Option<runtime_contracts::ImageRecord>> {
            Ok(None)
        }
        async fn find_images_by_container_id(&self, _id: &str) -> Result<Vec<runtime_contracts::ImageRecord>> {
            Ok(vec![])
        }
        async fn find_all_images(&self) -> Result<Vec<runtime_contracts::ImageRecord>> {
            Ok(vec![])
        }
        async fn update_image(&self, _i: runtime_contracts::ImageRecord) -> Result<()> {
            Ok(())
        }
        async fn update_image_metadata(&self, _id: Uuid, _m: runtime_contracts::ImageMetadata) -> Result<()> {
            Ok(())
        }
        async fn delete_image(&self, _id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn find_session_by_id(&self, _id: Uuid) -> Result<Option<runtime_contracts::SessionRecord>> {
            Ok(None)
        }
        async fn add_message(&self, message: Message) -> Result<()> {
            self.messages
                .write()
                .await
                .entry(message.session_id)
                .or_default()
                .push(message);
            Ok(())
        }
        async fn get_messages(&self, session_id: Uuid) -> Result<Vec<Message>> {
            Ok(self
                .messages
                .read()
                .await
                .get(&session_id)
                .cloned()
                .unwrap_or_default())
        }
        async fn clear_messages(&self, session_id: Uuid) -> Result<()> {
            self.messages.write().await.remove(&session_id);
            Ok(())
        }
        async fn delete_session(&self, _id: Uuid) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn receive_persists_then_emits() {
        let bus = SystemBus::new();
        let store = Arc::new(FakeStore {
            messages: RwLock::new(HashMap::new()),
        });
        let session_id = Uuid::now_v7();
        let interactor = AgentInteractor::new(bus.clone(), store.clone(), EventContext::default(), session_id);

        let seen = Arc::new(tokio::sync::Mutex::new(None));
        let seen2 = seen.clone();
        bus.on(
            "user_message",
            crate::bus::handler(move |e| {
                let seen2 = seen2.clone();
                Box::pin(async move {
                    *seen2.lock().await = Some(e);
                })
            }),
            Default::default(),
        )
        .await;

        let request_id = Uuid::now_v7();
        interactor.receive("hello", request_id).await.unwrap();

        let messages = store.get_messages(session_id).await.unwrap();
        assert_eq!(messages.len(), 1);

        let observed = seen.lock().await.clone().expect("event observed");
        assert_eq!(observed.r#type, "user_message");
        assert_eq!(observed.request_id, Some(request_id));
    }
}
