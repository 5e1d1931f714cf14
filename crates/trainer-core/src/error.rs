use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("invalid payload for '{action}': {reason}")]
    InvalidPayload { action: String, reason: String },

    #[error("invalid runtime mode: {0}")]
    InvalidMode(String),

    #[error("invalid execution kind: {0}")]
    InvalidExecutionKind(String),

    #[error("invalid symbol health: {0}")]
    InvalidHealth(String),

    #[error("invalid symbol source: {0}")]
    InvalidSymbolSource(String),

    #[error("invalid value type: {0}")]
    InvalidValueType(String),

    #[error("invalid reliability state: {0}")]
    InvalidReliabilityState(String),

    #[error("invalid capability state: {0}")]
    InvalidCapabilityState(String),

    #[error("invalid dependency status: {0}")]
    InvalidDependencyStatus(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TrainerError>;
