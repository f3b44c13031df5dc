// Shared wire and domain types for the runtime: records, messages, events, delivery.
// Decision: kept dependency-free of any async runtime - these are plain data types
// shared by runtime-core, runtime-storage, runtime-llm and runtime-api.

pub mod delivery;
pub mod event;
pub mod message;
pub mod record;
pub mod tools;

pub use delivery::{ConsumerCursor, DeliveryRecord};
pub use event::{EventCategory, EventContext, EventIntent, EventSource, SystemEvent};
pub use message::{Message, MessageContent, ToolCallContent, ToolResultContent};
pub use record::{
    AgentLifecycle, AgentRecord, ContainerRecord, ImageConfig, ImageMetadata, ImageRecord,
    SessionRecord,
};
pub use tools::{ToolCall, ToolResult};
