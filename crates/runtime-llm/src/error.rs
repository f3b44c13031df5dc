// Layered error type for this crate, mirroring runtime-core's RuntimeError
// shape: named variants per failure class plus an Internal(anyhow) catch-all.

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("request to LLM API failed: {0}")]
    Request(String),

    #[error("LLM API returned an error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl LlmError {
    pub fn config(msg: impl Into<String>) -> Self {
        LlmError::Configuration(msg.into())
    }

    pub fn request(msg: impl Into<String>) -> Self {
        LlmError::Request(msg.into())
    }
}

impl From<LlmError> for runtime_core::error::RuntimeError {
    fn from(err: LlmError) -> Self {
        runtime_core::error::RuntimeError::environment(err.to_string())
    }
}
