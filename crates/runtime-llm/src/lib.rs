//! SDK adapter implementing [`runtime_core::environment::LlmSdk`] against an
//! Anthropic-Messages-API-shaped streaming HTTP endpoint.

mod config;
mod driver;
mod error;
mod wire;

pub use config::AnthropicSdkConfig;
pub use driver::{build_sdk, AnthropicSdk};
pub use error::{LlmError, Result};
