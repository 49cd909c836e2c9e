//! Unified error handling for the replay tool.

use crate::config::ConfigError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine error: {0}")]
    Engine(#[from] hedge_engine::Error),

    #[error("Could not read script: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid script: {0}")]
    Script(#[from] serde_json::Error),

    #[error("Step {step} failed: {source}")]
    Step {
        step: usize,
        source: hedge_engine::Error,
    },

    #[error("Feeder task failed: {0}")]
    Feeder(#[from] tokio::task::JoinError),
}

/// Result type alias for the replay tool.
pub type AppResult<T> = Result<T, AppError>;
