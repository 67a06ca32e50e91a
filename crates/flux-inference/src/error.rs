use thiserror::Error;

/// 推理服务统一错误类型
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Orchestrator already started")]
    AlreadyStarted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("MQTT error: {0}")]
    Mqtt(String),

    #[error("Overlay error: {0}")]
    Overlay(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, InferenceError>;

impl From<config::ConfigError> for InferenceError {
    fn from(err: config::ConfigError) -> Self {
        InferenceError::Config(err.to_string())
    }
}

impl From<rumqttc::ClientError> for InferenceError {
    fn from(err: rumqttc::ClientError) -> Self {
        InferenceError::Mqtt(err.to_string())
    }
}
