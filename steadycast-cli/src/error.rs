use steadycast_engine::PlayerError;
use thiserror::Error;

use crate::script::ScriptError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Player error: {0}")]
    Player(#[from] PlayerError),

    #[error("Invalid fault script: {0}")]
    Script(#[from] ScriptError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, AppError>;
