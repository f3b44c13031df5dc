pub mod agent;
pub mod bus;
pub mod command_handler;
pub mod config;
pub mod container;
pub mod delivery_queue;
pub mod driver;
pub mod engine;
pub mod environment;
pub mod error;
pub mod interactor;
pub mod persistence;
pub mod queue;
pub mod runtime;
pub mod testing;

pub use agent::RuntimeAgent;
pub use bus::{BusConsumer, BusProducer, SystemBus};
pub use command_handler::CommandHandler;
pub use config::{DefaultAgentConfig, RuntimeConfig};
pub use container::RuntimeContainer;
pub use delivery_queue::{DeliveryQueue, DeliveryQueueConfig};
pub use environment::{Environment, LlmSdk};
pub use error::{Result, RuntimeError};
pub use persistence::PersistenceDriver;
pub use runtime::Runtime;
