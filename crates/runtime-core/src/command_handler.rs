// CommandHandler: binds `*_request` event types to container/image/agent
// operations and emits the paired `*_response`, per the request/response
// contract table. Operational failures additionally raise a `system_error`
// broadcast; validation failures (unknown id) only populate `error` on the
// response.

use std::collections::HashMap;
use std::sync::Arc;

use runtime_contracts::event::{EventCategory, EventIntent, EventSource};
use runtime_contracts::{ImageConfig, ImageRecord, SessionRecord, SystemEvent};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

use crate::bus::{handler, SubscribeOptions, Subscriber, SystemBus};
use crate::config::DefaultAgentConfig;
use crate::container::RuntimeContainer;
use crate::environment::LlmSdk;
use crate::error::{Result, RuntimeError};
use crate::persistence::PersistenceDriver;

pub struct CommandHandler {
    bus: SystemBus,
    persistence: Arc<dyn PersistenceDriver>,
    sdk: Arc<dyn LlmSdk>,
    base_path: String,
    default_agent: DefaultAgentConfig,
    containers: RwLock<HashMap<String, Arc<RuntimeContainer>>>,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl CommandHandler {
    pub fn new(
        bus: SystemBus,
        persistence: Arc<dyn PersistenceDriver>,
        sdk: Arc<dyn LlmSdk>,
        base_path: impl Into<String>,
        default_agent: DefaultAgentConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            persistence,
            sdk,
            base_path: base_path.into(),
            default_agent,
            containers: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
        })
    }

    /// Subscribes to every request type this handler understands. Call once
    /// after construction.
    pub async fn install(self: &Arc<Self>) {
        let mut subs = Vec::new();
        macro_rules! bind {
            ($ty:literal, $method:ident) => {{
                let this = self.clone();
                subs.push(
                    self.bus
                        .on_command(
                            $ty,
                            handler(move |event| {
                                let this = this.clone();
                                Box::pin(async move { this.$method(event).await })
                            }),
                        )
                        .await,
                );
            }};
        }
        bind!("container_create_request", handle_container_create);
        bind!("container_get_request", handle_container_get);
        bind!("container_list_request", handle_container_list);
        bind!("image_create_request", handle_image_create);
        bind!("image_run_request", handle_image_run);
        bind!("image_stop_request", handle_image_stop);
        bind!("image_update_request", handle_image_update);
        bind!("image_list_request", handle_image_list);
        bind!("image_get_request", handle_image_get);
        bind!("image_delete_request", handle_image_delete);
        bind!("image_messages_request", handle_image_messages);
        bind!("message_send_request", handle_message_send);
        bind!("agent_interrupt_request", handle_agent_interrupt);
        bind!("agent_get_request", handle_agent_get);
        bind!("agent_list_request", handle_agent_list);
        bind!("agent_destroy_request", handle_agent_destroy);
        bind!("agent_destroy_all_request", handle_agent_destroy_all);

        *self.subscribers.write().await = subs;
    }

    async fn respond(&self, request: &SystemEvent, response_type: &str, data: serde_json::Value) {
        let mut event = SystemEvent::new(
            response_type,
            EventSource::Command,
            EventCategory::Response,
            EventIntent::Result,
            data,
        );
        event.request_id = request.request_id;
        self.bus.emit_command(event).await;
    }

    async fn respond_error(&self, request: &SystemEvent, response_type: &str, err: &RuntimeError) {
        self.respond(request, response_type, json!({ "error": err.to_string() })).await;
        if err.is_operational() {
            let mut system_error = SystemEvent::new(
                "system_error",
                EventSource::Command,
                EventCategory::Error,
                EventIntent::Notification,
                json!({
                    "message": err.to_string(),
                    "severity": "error",
                    "details": { "operation": request.r#type },
                }),
            );
            system_error.request_id = request.request_id;
            self.bus.emit(system_error).await;
        }
    }

    async fn get_or_create_container(&self, container_id: &str) -> Result<Arc<RuntimeContainer>> {
        Ok(self.get_or_create_container_checked(container_id).await?.0)
    }

    /// Same as `get_or_create_container` but also reports whether this call
    /// is the one that actually created the container, so callers can gate
    /// a one-time `container_created` lifecycle notification on it.
    async fn get_or_create_container_checked(&self, container_id: &str) -> Result<(Arc<RuntimeContainer>, bool)> {
        if let Some(c) = self.containers.read().await.get(container_id).cloned() {
            return Ok((c, false));
        }
        if self.persistence.find_container_by_id(container_id).await?.is_none() {
            self.persistence
                .save_container(runtime_contracts::ContainerRecord::new(container_id))
                .await?;
        }
        let container = Arc::new(RuntimeContainer::new(
            container_id,
            self.bus.clone(),
            self.persistence.clone(),
            self.sdk.clone(),
            self.base_path.clone(),
        ));
        self.containers
            .write()
            .await
            .insert(container_id.to_string(), container.clone());
        Ok((container, true))
    }

    #[instrument(skip(self, event))]
    async fn handle_container_create(&self, event: SystemEvent) {
        let container_id = event.data.get("container_id").and_then(|v| v.as_str()).unwrap_or_default();
        match self.get_or_create_container_checked(container_id).await {
            Ok((_, created)) => {
                self.respond(&event, "container_create_response", json!({"container_id": container_id}))
                    .await;
                // "emit container_created once" per the request/response table - a
                // separate lifecycle notification, fired only the call that actually
                // created the container, not on every load-or-create hit.
                if created {
                    let notification = SystemEvent::new(
                        "container_created",
                        EventSource::Command,
                        EventCategory::Lifecycle,
                        EventIntent::Notification,
                        json!({"container_id": container_id}),
                    );
                    self.bus.emit(notification).await;
                }
            }
            Err(err) => self.respond_error(&event, "container_create_response", &err).await,
        }
    }

    #[instrument(skip(self, event))]
    async fn handle_container_get(&self, event: SystemEvent) {
        let container_id = event.data.get("container_id").and_then(|v| v.as_str()).unwrap_or_default();
        let exists = self.containers.read().await.contains_key(container_id)
            || matches!(self.persistence.find_container_by_id(container_id).await, Ok(Some(_)));
        self.respond(&event, "container_get_response", json!({"container_id": container_id, "exists": exists}))
            .await;
    }

    #[instrument(skip(self, event))]
    async fn handle_container_list(&self, event: SystemEvent) {
        let container_ids: Vec<String> = self.containers.read().await.keys().cloned().collect();
        self.respond(&event, "container_list_response", json!({"container_ids": container_ids})).await;
    }

    /// Resolves the `RuntimeAgent` a `message_send_request`/`agent_interrupt_request`
    /// targets, accepting either an `image_id` (auto-activating the image if
    /// needed) or a direct `agent_id` already known to some in-memory container.
    async fn resolve_agent(
        &self,
        event: &SystemEvent,
        activate_if_image: bool,
    ) -> Result<(Option<Uuid>, Arc<crate::agent::RuntimeAgent>)> {
        if let Ok(image_id) = parse_uuid(event, "image_id") {
            let image = self
                .persistence
                .find_image_by_id(image_id)
                .await?
                .ok_or(RuntimeError::UnknownImage(image_id))?;
            let container = self.get_or_create_container(&image.container_id).await?;
            let agent = if activate_if_image {
                let outcome = container.run_image(&image).await?;
                container.agent_by_id(outcome.agent_id).await.ok_or(RuntimeError::UnknownAgent(outcome.agent_id))?
            } else {
                container.agent_for_image(image_id).await.ok_or(RuntimeError::ImageOffline(image_id))?
            };
            return Ok((Some(image_id), agent));
        }

        let agent_id = parse_uuid(event, "agent_id")?;
        let containers: Vec<_> = self.containers.read().await.values().cloned().collect();
        for container in containers {
            if let Some(agent) = container.agent_by_id(agent_id).await {
                return Ok((None, agent));
            }
        }
        Err(RuntimeError::UnknownAgent(agent_id))
    }

    async fn find_container_for_agent(&self, agent_id: Uuid) -> Option<Arc<RuntimeContainer>> {
        let containers: Vec<_> = self.containers.read().await.values().cloned().collect();
        for container in containers {
            if container.agent_by_id(agent_id).await.is_some() {
                return Some(container);
            }
        }
        None
    }

    #[instrument(skip(self, event))]
    async fn handle_image_create(&self, event: SystemEvent) {
        let container_id = event.data.get("container_id").and_then(|v| v.as_str()).unwrap_or_default();
        let mut config: ImageConfig = event
            .data
            .get("config")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        config.name = config.name.or_else(|| self.default_agent.name.clone());
        config.description = config.description.or_else(|| self.default_agent.description.clone());
        config.system_prompt = config.system_prompt.or_else(|| self.default_agent.system_prompt.clone());

        let outcome: Result<ImageRecord> = async {
            self.get_or_create_container(container_id).await?;
            let image = ImageRecord::new(container_id, config);
            let session = SessionRecord::new(image.session_id, image.image_id, container_id);
            self.persistence.create_image(image.clone(), session).await?;
            Ok(image)
        }
        .await;

        match outcome {
            Ok(image) => {
                self.respond(
                    &event,
                    "image_create_response",
                    json!({"record": &image, "__subscriptions": [image.session_id]}),
                )
                .await
            }
            Err(err) => self.respond_error(&event, "image_create_response", &err).await,
        }
    }

    #[instrument(skip(self, event))]
    async fn handle_image_run(&self, event: SystemEvent) {
        let image_id = parse_uuid(&event, "image_id");
        let result: Result<_> = async {
            let image_id = image_id?;
            let image = self
                .persistence
                .find_image_by_id(image_id)
                .await?
                .ok_or(RuntimeError::UnknownImage(image_id))?;
            let container = self.get_or_create_container(&image.container_id).await?;
            container.run_image(&image).await
        }
        .await;

        match result {
            Ok(outcome) => {
                self.respond(
                    &event,
                    "image_run_response",
                    json!({"image_id": image_id.ok(), "agent_id": outcome.agent_id, "reused": outcome.reused}),
                )
                .await
            }
            Err(err) => self.respond_error(&event, "image_run_response", &err).await,
        }
    }

    #[instrument(skip(self, event))]
    async fn handle_image_stop(&self, event: SystemEvent) {
        let result: Result<Uuid> = async {
            let image_id = parse_uuid(&event, "image_id")?;
            let image = self
                .persistence
                .find_image_by_id(image_id)
                .await?
                .ok_or(RuntimeError::UnknownImage(image_id))?;
            let container = self.get_or_create_container(&image.container_id).await?;
            container.stop_image(image_id).await?;
            Ok(image_id)
        }
        .await;

        match result {
            Ok(image_id) => self.respond(&event, "image_stop_response", json!({"image_id": image_id})).await,
            Err(err) => self.respond_error(&event, "image_stop_response", &err).await,
        }
    }

    /// Whether `record`'s image has a live (non-destroyed) agent in some
    /// in-memory container, and that agent's id if so.
    async fn image_online_info(&self, record: &ImageRecord) -> (bool, Option<Uuid>) {
        let Some(container) = self.containers.read().await.get(&record.container_id).cloned() else {
            return (false, None);
        };
        let Some(agent) = container.agent_for_image(record.image_id).await else {
            return (false, None);
        };
        if agent.lifecycle().await == runtime_contracts::AgentLifecycle::Destroyed {
            return (false, None);
        }
        (true, Some(agent.agent_id))
    }

    /// Serializes `record` with `online`/`agent_id` joined in, per SPEC_FULL.md
    /// §4.8's `image_list_request`/`image_get_request` contract.
    async fn enrich_image(&self, record: &ImageRecord) -> serde_json::Value {
        let (online, agent_id) = self.image_online_info(record).await;
        let mut value = serde_json::to_value(record).unwrap_or_else(|_| json!({}));
        if let serde_json::Value::Object(map) = &mut value {
            map.insert("online".to_string(), json!(online));
            map.insert("agent_id".to_string(), json!(agent_id));
        }
        value
    }

    #[instrument(skip(self, event))]
    async fn handle_image_list(&self, event: SystemEvent) {
        let container_id = event.data.get("container_id").and_then(|v| v.as_str());
        let result: Result<Vec<ImageRecord>> = match container_id {
            Some(id) => self.persistence.find_images_by_container_id(id).await,
            None => self.persistence.find_all_images().await,
        };
        match result {
            Ok(records) => {
                let session_ids: Vec<Uuid> = records.iter().map(|r| r.session_id).collect();
                let mut enriched = Vec::with_capacity(records.len());
                for record in &records {
                    enriched.push(self.enrich_image(record).await);
                }
                self.respond(
                    &event,
                    "image_list_response",
                    json!({"records": enriched, "__subscriptions": session_ids}),
                )
                .await
            }
            Err(err) => self.respond_error(&event, "image_list_response", &err).await,
        }
    }

    #[instrument(skip(self, event))]
    async fn handle_image_get(&self, event: SystemEvent) {
        let result: Result<Option<ImageRecord>> = async {
            let image_id = parse_uuid(&event, "image_id")?;
            self.persistence.find_image_by_id(image_id).await
        }
        .await;
        match result {
            Ok(Some(record)) => {
                let enriched = self.enrich_image(&record).await;
                self.respond(
                    &event,
                    "image_get_response",
                    json!({"record": enriched, "__subscriptions": [record.session_id]}),
                )
                .await
            }
            Ok(None) => self.respond(&event, "image_get_response", json!({"record": null})).await,
            Err(err) => self.respond_error(&event, "image_get_response", &err).await,
        }
    }

    #[instrument(skip(self, event))]
    async fn handle_image_delete(&self, event: SystemEvent) {
        let result: Result<Uuid> = async {
            let image_id = parse_uuid(&event, "image_id")?;
            let image = self
                .persistence
                .find_image_by_id(image_id)
                .await?
                .ok_or(RuntimeError::UnknownImage(image_id))?;
            if let Some(container) = self.containers.read().await.get(&image.container_id).cloned() {
                container.stop_image(image_id).await?;
            }
            self.persistence.delete_image(image_id).await?;
            Ok(image_id)
        }
        .await;

        match result {
            Ok(image_id) => self.respond(&event, "image_delete_response", json!({"image_id": image_id})).await,
            Err(err) => self.respond_error(&event, "image_delete_response", &err).await,
        }
    }

    #[instrument(skip(self, event))]
    async fn handle_image_messages(&self, event: SystemEvent) {
        let result: Result<(Uuid, Vec<_>)> = async {
            let image_id = parse_uuid(&event, "image_id")?;
            let image = self
                .persistence
                .find_image_by_id(image_id)
                .await?
                .ok_or(RuntimeError::UnknownImage(image_id))?;
            let messages = self.persistence.get_messages(image.session_id).await?;
            Ok((image_id, messages))
        }
        .await;
        match result {
            Ok((image_id, messages)) => {
                self.respond(&event, "image_messages_response", json!({"image_id": image_id, "messages": messages}))
                    .await
            }
            Err(err) => self.respond_error(&event, "image_messages_response", &err).await,
        }
    }

    #[instrument(skip(self, event))]
    async fn handle_message_send(&self, event: SystemEvent) {
        let content = event.data.get("content").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let request_id = event.request_id.unwrap_or_else(Uuid::now_v7);

        let result: Result<(Option<Uuid>, Uuid)> = async {
            let (image_id, agent) = self.resolve_agent(&event, true).await?;
            let agent_id = agent.agent_id;
            agent.receive(content, request_id).await?;
            Ok((image_id, agent_id))
        }
        .await;

        match result {
            Ok((image_id, agent_id)) => {
                self.respond(&event, "message_send_response", json!({"image_id": image_id, "agent_id": agent_id}))
                    .await
            }
            Err(err) => self.respond_error(&event, "message_send_response", &err).await,
        }
    }

    #[instrument(skip(self, event))]
    async fn handle_agent_interrupt(&self, event: SystemEvent) {
        let request_id = event.request_id;
        let result: Result<(Option<Uuid>, Uuid)> = async {
            let (image_id, agent) = self.resolve_agent(&event, false).await?;
            let agent_id = agent.agent_id;
            agent.interrupt(request_id).await;
            Ok((image_id, agent_id))
        }
        .await;

        match result {
            Ok((image_id, agent_id)) => {
                self.respond(&event, "agent_interrupt_response", json!({"image_id": image_id, "agent_id": agent_id}))
                    .await
            }
            Err(err) => self.respond_error(&event, "agent_interrupt_response", &err).await,
        }
    }

    #[instrument(skip(self, event))]
    async fn handle_image_update(&self, event: SystemEvent) {
        let result: Result<ImageRecord> = async {
            let image_id = parse_uuid(&event, "image_id")?;
            let mut image = self
                .persistence
                .find_image_by_id(image_id)
                .await?
                .ok_or(RuntimeError::UnknownImage(image_id))?;

            if let Some(updates) = event.data.get("updates") {
                if let Some(name) = updates.get("name").and_then(|v| v.as_str()) {
                    image.name = name.to_string();
                }
                if updates.get("description").is_some() {
                    image.description = updates.get("description").and_then(|v| v.as_str()).map(String::from);
                }
                if updates.get("system_prompt").is_some() {
                    image.system_prompt = updates.get("system_prompt").and_then(|v| v.as_str()).map(String::from);
                }
                if let Some(mcp_servers) = updates.get("mcp_servers") {
                    image.mcp_servers = mcp_servers.clone();
                }
            }
            image.updated_at = chrono::Utc::now();
            self.persistence.update_image(image.clone()).await?;
            Ok(image)
        }
        .await;

        match result {
            Ok(record) => self.respond(&event, "image_update_response", json!({"record": &record})).await,
            Err(err) => self.respond_error(&event, "image_update_response", &err).await,
        }
    }

    #[instrument(skip(self, event))]
    async fn handle_agent_get(&self, event: SystemEvent) {
        let result: Result<Uuid> = parse_uuid(&event, "agent_id");
        match result {
            Ok(agent_id) => {
                let container = self.find_container_for_agent(agent_id).await;
                let agent = match &container {
                    Some(container) => container.agent_by_id(agent_id).await,
                    None => None,
                };
                match agent {
                    Some(agent) => {
                        self.respond(
                            &event,
                            "agent_get_response",
                            json!({
                                "agent_id": agent_id,
                                "image_id": agent.image_id,
                                "exists": true,
                                "lifecycle": agent.lifecycle().await,
                            }),
                        )
                        .await
                    }
                    None => {
                        self.respond(&event, "agent_get_response", json!({"agent_id": agent_id, "exists": false}))
                            .await
                    }
                }
            }
            Err(err) => self.respond_error(&event, "agent_get_response", &err).await,
        }
    }

    #[instrument(skip(self, event))]
    async fn handle_agent_list(&self, event: SystemEvent) {
        let containers: Vec<_> = self.containers.read().await.values().cloned().collect();
        let mut agents = Vec::new();
        for container in containers {
            for agent_id in container.list_agent_ids().await {
                if let Some(agent) = container.agent_by_id(agent_id).await {
                    agents.push(json!({
                        "agent_id": agent_id,
                        "image_id": agent.image_id,
                        "container_id": container.container_id,
                        "lifecycle": agent.lifecycle().await,
                    }));
                }
            }
        }
        self.respond(&event, "agent_list_response", json!({"agents": agents})).await;
    }

    #[instrument(skip(self, event))]
    async fn handle_agent_destroy(&self, event: SystemEvent) {
        let result: Result<Uuid> = async {
            let agent_id = parse_uuid(&event, "agent_id")?;
            let container = self.find_container_for_agent(agent_id).await.ok_or(RuntimeError::UnknownAgent(agent_id))?;
            container.destroy_agent(agent_id).await?;
            Ok(agent_id)
        }
        .await;

        match result {
            Ok(agent_id) => self.respond(&event, "agent_destroy_response", json!({"agent_id": agent_id})).await,
            Err(err) => self.respond_error(&event, "agent_destroy_response", &err).await,
        }
    }

    #[instrument(skip(self, event))]
    async fn handle_agent_destroy_all(&self, event: SystemEvent) {
        let containers: Vec<_> = self.containers.read().await.values().cloned().collect();
        let mut destroyed = Vec::new();
        for container in containers {
            for agent_id in container.list_agent_ids().await {
                if container.destroy_agent(agent_id).await.is_ok() {
                    destroyed.push(agent_id);
                }
            }
        }
        self.respond(&event, "agent_destroy_all_response", json!({"agent_ids": destroyed})).await;
    }

    pub async fn dispose(&self) {
        let containers: Vec<_> = self.containers.write().await.drain().map(|(_, c)| c).collect();
        for container in containers {
            container.dispose().await;
        }
        let subs: Vec<_> = self.subscribers.write().await.drain(..).collect();
        for sub in subs {
            sub.unsubscribe().await;
        }
    }
}

fn parse_uuid(event: &SystemEvent, field: &str) -> Result<Uuid> {
    event
        .data
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| RuntimeError::config(format!("missing or invalid `{field}`")))
}
