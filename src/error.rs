use thiserror::Error;

use crate::action::ActionId;
use crate::config::ConfigError;
use crate::network::QueueError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Payload encoding error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("No dead letter with id {0}")]
    UnknownDeadLetter(ActionId),
}

pub type Result<T> = std::result::Result<T, SyncError>;
