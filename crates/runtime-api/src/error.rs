// Transport-facing error type, following the same layered shape as
// runtime-core's RuntimeError: named variants plus an Internal(anyhow)
// catch-all. Only reached when a failure happens outside the bus's own
// request/response error channel (bad upgrade, malformed frame, startup).

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to bind listener: {0}")]
    Bind(String),

    #[error(transparent)]
    Runtime(#[from] runtime_core::error::RuntimeError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn config(msg: impl Into<String>) -> Self {
        ApiError::Configuration(msg.into())
    }
}
