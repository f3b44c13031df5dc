// RuntimeContainer: groups images, maintains the image<->agent map, and owns
// agent lifecycle. Locks are held only long enough to read/mutate the map -
// never across an await that drives agent I/O (mirrors the inbound-router
// discipline of never holding a lock across an await point).

use std::collections::HashMap;
use std::sync::Arc;

use runtime_contracts::event::{EventCategory, EventContext, EventIntent, EventSource};
use runtime_contracts::{ImageRecord, SystemEvent};
use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::agent::RuntimeAgent;
use crate::bus::SystemBus;
use crate::environment::LlmSdk;
use crate::error::Result;
use crate::persistence::PersistenceDriver;

pub struct RunImageOutcome {
    pub agent_id: Uuid,
    pub reused: bool,
}

pub struct RuntimeContainer {
    pub container_id: String,
    bus: SystemBus,
    persistence: Arc<dyn PersistenceDriver>,
    sdk: Arc<dyn LlmSdk>,
    base_path: String,
    image_to_agent: RwLock<HashMap<Uuid, Arc<RuntimeAgent>>>,
}

impl RuntimeContainer {
    pub fn new(
        container_id: impl Into<String>,
        bus: SystemBus,
        persistence: Arc<dyn PersistenceDriver>,
        sdk: Arc<dyn LlmSdk>,
        base_path: impl Into<String>,
    ) -> Self {
        Self {
            container_id: container_id.into(),
            bus,
            persistence,
            sdk,
            base_path: base_path.into(),
            image_to_agent: RwLock::new(HashMap::new()),
        }
    }

    pub async fn run_image(&self, image: &ImageRecord) -> Result<RunImageOutcome> {
        if let Some(agent) = self.image_to_agent.read().await.get(&image.image_id).cloned() {
            if agent.lifecycle().await != runtime_contracts::AgentLifecycle::Destroyed {
                return Ok(RunImageOutcome {
                    agent_id: agent.agent_id,
                    reused: true,
                });
            }
        }
        // stale mapping (agent destroyed underneath us) - drop it before recreating
        self.image_to_agent.write().await.remove(&image.image_id);

        let agent = RuntimeAgent::start(
            self.bus.clone(),
            self.persistence.clone(),
            self.sdk.clone(),
            image,
            &self.base_path,
        )
        .await?;
        let agent_id = agent.agent_id;
        let agent = Arc::new(agent);
        self.image_to_agent.write().await.insert(image.image_id, agent);

        self.emit(
            "agent_registered",
            EventCategory::Lifecycle,
            json!({"agent_id": agent_id, "image_id": image.image_id}),
            EventContext::default()
                .with_container(self.container_id.clone())
                .with_image(image.image_id)
                .with_agent(agent_id),
        )
        .await;

        Ok(RunImageOutcome { agent_id, reused: false })
    }

    pub async fn stop_image(&self, image_id: Uuid) -> Result<()> {
        let agent = self.image_to_agent.write().await.remove(&image_id);
        if let Some(agent) = agent {
            self.destroy_agent_arc(agent).await;
        }
        Ok(())
    }

    pub async fn destroy_agent(&self, agent_id: Uuid) -> Result<()> {
        let image_id = {
            let map = self.image_to_agent.read().await;
            map.iter()
                .find(|(_, a)| a.agent_id == agent_id)
                .map(|(image_id, _)| *image_id)
        };
        if let Some(image_id) = image_id {
            self.stop_image(image_id).await?;
        }
        Ok(())
    }

    pub async fn agent_for_image(&self, image_id: Uuid) -> Option<Arc<RuntimeAgent>> {
        self.image_to_agent.read().await.get(&image_id).cloned()
    }

    pub async fn agent_by_id(&self, agent_id: Uuid) -> Option<Arc<RuntimeAgent>> {
        self.image_to_agent
            .read()
            .await
            .values()
            .find(|a| a.agent_id == agent_id)
            .cloned()
    }

    pub async fn list_agent_ids(&self) -> Vec<Uuid> {
        self.image_to_agent.read().await.values().map(|a| a.agent_id).collect()
    }

    pub async fn dispose(&self) {
        let agents: Vec<_> = {
            let mut map = self.image_to_agent.write().await;
            map.drain().map(|(_, agent)| agent).collect()
        };
        for agent in agents {
            self.destroy_agent_arc(agent).await;
        }
        self.emit(
            "container_destroyed",
            EventCategory::Lifecycle,
            json!({"container_id": self.container_id}),
            EventContext::default().with_container(self.container_id.clone()),
        )
        .await;
    }

    async fn destroy_agent_arc(&self, agent: Arc<RuntimeAgent>) {
        let agent_id = agent.agent_id;
        let image_id = agent.image_id;
        // `destroy` takes `&self` and is idempotent, so this tears the agent
        // down fully (cancels any in-flight turn, releases the environment,
        // detaches the driver/bridge) even if another `Arc` clone is still
        // held elsewhere, e.g. an in-flight `message_send_request`.
        agent.destroy().await;
        self.emit(
            "agent_unregistered",
            EventCategory::Lifecycle,
            json!({"agent_id": agent_id, "image_id": image_id}),
            EventContext::default()
                .with_container(self.container_id.clone())
                .with_image(image_id)
                .with_agent(agent_id),
        )
        .await;
    }

    async fn emit(&self, event_type: &str, category: EventCategory, data: serde_json::Value, context: EventContext) {
        let event = SystemEvent::new(event_type, EventSource::Container, category, EventIntent::Notification, data)
            .with_context(context);
        self.bus.emit(event).await;
    }
}
