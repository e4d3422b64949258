pub mod action;
pub mod common;
pub mod config;
pub mod engine;
pub mod error;
pub mod network;
pub mod overlay;
pub mod storage;

// Public exports
pub use action::{
    processor_fn, ActionId, ActionKind, ActionProcessor, ActionRecord, ProcessError,
    ProcessorRegistry,
};
pub use config::{EngineConfig, StorageConfig};
pub use engine::SyncEngine;
pub use error::SyncError;
pub use network::{OverflowStrategy, RetryPolicy, SyncResult};
pub use overlay::{BatchUpserter, OptimisticOverlay, OverlayEntry, Reloader};
