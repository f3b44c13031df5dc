// Layered error type for the runtime core, following the teacher's
// AgentLoopError shape: named variants for each failure class plus a
// catch-all `Internal` for anything bubbling up via anyhow.

use uuid::Uuid;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("unknown container: {0}")]
    UnknownContainer(String),

    #[error("unknown image: {0}")]
    UnknownImage(Uuid),

    #[error("unknown agent: {0}")]
    UnknownAgent(Uuid),

    #[error("image {0} has no running agent")]
    ImageOffline(Uuid),

    #[error("bus request timed out after {0:?}")]
    RequestTimeout(std::time::Duration),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("environment error: {0}")]
    Environment(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("runtime has been disposed")]
    Disposed,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RuntimeError {
    pub fn persistence(msg: impl Into<String>) -> Self {
        RuntimeError::Persistence(msg.into())
    }

    pub fn environment(msg: impl Into<String>) -> Self {
        RuntimeError::Environment(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        RuntimeError::Configuration(msg.into())
    }

    /// Whether this failure class also warrants a broadcast `system_error`
    /// notification, per the operational/validation split.
    pub fn is_operational(&self) -> bool {
        !matches!(
            self,
            RuntimeError::UnknownContainer(_)
                | RuntimeError::UnknownImage(_)
                | RuntimeError::UnknownAgent(_)
                | RuntimeError::ImageOffline(_)
        )
    }
}
