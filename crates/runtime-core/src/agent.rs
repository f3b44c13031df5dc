// RuntimeAgent: wires Interactor + Driver + Engine + Environment for one
// image and owns its lifecycle (running/stopped/destroyed).

use std::path::PathBuf;
use std::sync::Arc;

use runtime_contracts::event::{DriveableEventType, EventCategory, EventContext, EventIntent, EventSource};
use runtime_contracts::{AgentLifecycle, AgentRecord, ImageMetadata, ImageRecord, SystemEvent};
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::bus::{handler, SubscribeOptions, Subscriber, SystemBus};
use crate::driver::BusDriver;
use crate::engine::{AgentEngine, Presenter};
use crate::environment::{Environment, LlmSdk, OutboundContent};
use crate::error::{Result, RuntimeError};
use crate::interactor::AgentInteractor;
use crate::persistence::PersistenceDriver;

/// Re-emits this agent's environment-sourced DriveableEvents with
/// `source=agent` so external consumers see the live stream without having
/// to know about the internal environment/driver split (rule R1).
async fn spawn_stream_bridge(bus: &SystemBus, agent_id: Uuid, context: EventContext) -> Subscriber {
    let filter = Arc::new(move |e: &SystemEvent| {
        e.source == EventSource::Environment
            && e.context.agent_id == Some(agent_id)
            && DriveableEventType::all().iter().any(|d| d.as_str() == e.r#type)
    });
    let bus_for_emit = bus.clone();
    let context_for_bridge = context;

    bus.on(
        "*",
        handler(move |mut event| {
            let bus_for_emit = bus_for_emit.clone();
            let context_for_bridge = context_for_bridge.clone();
            Box::pin(async move {
                event.source = EventSource::Agent;
                event.context = context_for_bridge;
                bus_for_emit.emit(event).await;
            })
        }),
        SubscribeOptions {
            priority: 10,
            once: false,
            filter: Some(filter),
        },
    )
    .await
}

pub struct RuntimeAgent {
    pub agent_id: Uuid,
    pub image_id: Uuid,
    bus: SystemBus,
    context: EventContext,
    interactor: AgentInteractor,
    environment: Environment,
    // Held behind a lock (rather than consumed by-value) so `destroy` can run
    // against a shared `&self` - agents are kept in `Arc`s and other holders
    // (e.g. an in-flight `message_send_request`) may still be live when a
    // container wants to tear one down.
    driver: Mutex<Option<BusDriver>>,
    bridge: Mutex<Option<Subscriber>>,
    lifecycle: RwLock<AgentLifecycle>,
}

impl RuntimeAgent {
    pub async fn start(
        bus: SystemBus,
        persistence: Arc<dyn PersistenceDriver>,
        sdk: Arc<dyn LlmSdk>,
        image: &ImageRecord,
        base_path: &str,
    ) -> Result<Self> {
        let agent_record = AgentRecord::new(image.image_id, image.container_id.clone());
        let agent_id = agent_record.agent_id;

        let context = EventContext::default()
            .with_container(image.container_id.clone())
            .with_image(image.image_id)
            .with_agent(agent_id)
            .with_session(image.session_id);

        let workdir = PathBuf::from(base_path)
            .join("containers")
            .join(&image.container_id)
            .join("workdirs")
            .join(image.image_id.to_string());
        tokio::fs::create_dir_all(&workdir).await.ok();

        let presenter = Presenter::new(bus.clone(), persistence.clone(), context.clone(), image.session_id);
        let engine = Arc::new(AgentEngine::new(presenter));
        let driver = BusDriver::attach(&bus, agent_id, engine).await;
        let bridge = spawn_stream_bridge(&bus, agent_id, context.clone()).await;

        let interactor = AgentInteractor::new(bus.clone(), persistence.clone(), context.clone(), image.session_id);

        let persistence_for_resume = persistence.clone();
        let image_id = image.image_id;
        let on_session_id: Arc<dyn Fn(String) + Send + Sync> = Arc::new(move |sdk_session_id: String| {
            let persistence = persistence_for_resume.clone();
            let metadata = ImageMetadata {
                resume_session_id: Some(sdk_session_id),
            };
            tokio::spawn(async move {
                let _ = persistence.update_image_metadata(image_id, metadata).await;
            });
        });

        let environment = Environment::spawn(
            bus.clone(),
            sdk,
            context,
            image.system_prompt.clone(),
            workdir,
            image.mcp_servers.clone(),
            image.metadata.resume_session_id.clone(),
            on_session_id,
        );

        Ok(Self {
            agent_id,
            image_id: image.image_id,
            bus,
            context,
            interactor,
            environment,
            driver: Mutex::new(Some(driver)),
            bridge: Mutex::new(Some(bridge)),
            lifecycle: RwLock::new(AgentLifecycle::Running),
        })
    }

    pub async fn receive(&self, content: impl Into<String>, request_id: Uuid) -> Result<()> {
        if *self.lifecycle.read().await != AgentLifecycle::Running {
            return Err(RuntimeError::UnknownAgent(self.agent_id));
        }
        let text = content.into();
        self.interactor.receive(text.clone(), request_id).await?;
        self.environment.receive(request_id, OutboundContent::Text(text)).await;
        Ok(())
    }

    pub async fn interrupt(&self, request_id: Option<Uuid>) {
        self.interactor.interrupt(request_id).await;
        self.environment.interrupt(request_id).await;
    }

    pub async fn lifecycle(&self) -> AgentLifecycle {
        *self.lifecycle.read().await
    }

    /// Pauses the agent: in-flight turns are interrupted and new `receive`
    /// calls are rejected until `resume()`. The driver/environment/engine
    /// stay intact so the conversation can continue without re-running the
    /// image.
    pub async fn stop(&self) {
        self.interrupt(None).await;
        *self.lifecycle.write().await = AgentLifecycle::Stopped;
    }

    pub async fn resume(&self) {
        let mut lifecycle = self.lifecycle.write().await;
        if *lifecycle == AgentLifecycle::Stopped {
            *lifecycle = AgentLifecycle::Running;
        }
    }

    /// Tears the agent down: cancels any in-flight turn, releases the
    /// environment's SDK resources, detaches the `BusDriver` and stream
    /// bridge, and emits `session_destroyed`. Takes `&self` and is
    /// idempotent so it is safe to call on a clone of an `Arc<RuntimeAgent>`
    /// while another clone is still in use elsewhere (e.g. a
    /// `message_send_request` holding it across `receive().await`) - the
    /// first caller to observe a non-`Destroyed` lifecycle performs the
    /// teardown, every other caller is a no-op.
    pub async fn destroy(&self) {
        {
            let mut lifecycle = self.lifecycle.write().await;
            if *lifecycle == AgentLifecycle::Destroyed {
                return;
            }
            *lifecycle = AgentLifecycle::Destroyed;
        }

        self.environment.shutdown().await;
        if let Some(driver) = self.driver.lock().await.take() {
            driver.detach().await;
        }
        if let Some(bridge) = self.bridge.lock().await.take() {
            bridge.unsubscribe().await;
        }

        let event = SystemEvent::new(
            "session_destroyed",
            EventSource::Agent,
            EventCategory::Lifecycle,
            EventIntent::Notification,
            json!({"agent_id": self.agent_id, "image_id": self.image_id}),
        )
        .with_context(self.context.clone());
        self.bus.emit(event).await;
    }
}
