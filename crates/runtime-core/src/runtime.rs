// Runtime: the process-wide singleton owning the bus, command handler and
// delivery queue. Shutdown disposes in reverse construction order.

use std::sync::Arc;

use tracing::info;

use crate::bus::SystemBus;
use crate::command_handler::CommandHandler;
use crate::config::{DefaultAgentConfig, RuntimeConfig};
use crate::delivery_queue::{DeliveryQueue, DeliveryQueueConfig};
use crate::environment::LlmSdk;
use crate::persistence::PersistenceDriver;
use runtime_contracts::SystemEvent;

pub struct Runtime {
    pub bus: SystemBus,
    pub command_handler: Arc<CommandHandler>,
    pub delivery_queue: Arc<DeliveryQueue>,
    sweeper: tokio::task::JoinHandle<()>,
    bridge: tokio::task::JoinHandle<()>,
}

impl Runtime {
    pub async fn start(
        config: RuntimeConfig,
        default_agent: DefaultAgentConfig,
        persistence: Arc<dyn PersistenceDriver>,
        sdk: Arc<dyn LlmSdk>,
    ) -> Self {
        let bus = SystemBus::new();
        let command_handler = CommandHandler::new(
            bus.clone(),
            persistence,
            sdk,
            config.base_path.clone(),
            default_agent,
        );
        command_handler.install().await;

        let delivery_queue = DeliveryQueue::new(DeliveryQueueConfig {
            high_water_mark: config.delivery_queue_high_water_mark,
            consumer_ttl: chrono::Duration::hours(config.consumer_ttl_hours),
            event_ttl: chrono::Duration::hours(config.event_ttl_hours),
        });
        let sweeper = delivery_queue.spawn_sweeper(std::time::Duration::from_secs(60 * 10));
        let bridge = spawn_queue_bridge(&bus, delivery_queue.clone());

        info!("runtime started");
        Self {
            bus,
            command_handler,
            delivery_queue,
            sweeper,
            bridge,
        }
    }

    pub async fn dispose(self) {
        self.command_handler.dispose().await;
        self.sweeper.abort();
        self.bridge.abort();
        info!("runtime disposed");
    }
}

/// Feeds every externally-observable bus event into the delivery queue.
/// `DeliveryQueue::append` itself drops internal `intent=Request` events and
/// anything with no `context.session_id`, so no filter is needed here.
fn spawn_queue_bridge(bus: &SystemBus, queue: Arc<DeliveryQueue>) -> tokio::task::JoinHandle<()> {
    let bus = bus.clone();
    tokio::spawn(async move {
        let _subscriber = bus
            .on(
                "*",
                crate::bus::handler(move |event: SystemEvent| {
                    let queue = queue.clone();
                    Box::pin(async move {
                        queue.append(event).await;
                    })
                }),
                crate::bus::SubscribeOptions {
                    priority: -100,
                    ..Default::default()
                },
            )
            .await;
        std::future::pending::<()>().await;
    })
}
