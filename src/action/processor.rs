use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::record::{ActionKind, ActionRecord};

/// Why a processor could not apply a record to the remote store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// Network blip or temporary unavailability. Consumes one retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The remote store rejected the payload. Retrying cannot help.
    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("processing timed out after {0:?}")]
    Timeout(Duration),
}

impl ProcessError {
    pub fn transient(msg: impl Into<String>) -> Self {
        ProcessError::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        ProcessError::Permanent(msg.into())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, ProcessError::Permanent(_))
    }
}

/// Applies one queued mutation to the authoritative remote store.
///
/// Implementations must be idempotent. A call that succeeded remotely but
/// whose confirmation was lost is retried with the same record.
#[async_trait]
pub trait ActionProcessor: Send + Sync {
    async fn process(&self, record: &ActionRecord) -> Result<(), ProcessError>;
}

/// Adapter turning an async closure into an [`ActionProcessor`].
pub struct FnProcessor<F> {
    f: F,
}

pub fn processor_fn<F, Fut>(f: F) -> FnProcessor<F>
where
    F: Fn(ActionRecord) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ProcessError>> + Send,
{
    FnProcessor { f }
}

#[async_trait]
impl<F, Fut> ActionProcessor for FnProcessor<F>
where
    F: Fn(ActionRecord) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ProcessError>> + Send,
{
    async fn process(&self, record: &ActionRecord) -> Result<(), ProcessError> {
        (self.f)(record.clone()).await
    }
}

/// Routes each record to the processor registered for its kind.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<ActionKind, Arc<dyn ActionProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<K, P>(mut self, kind: K, processor: P) -> Self
    where
        K: Into<ActionKind>,
        P: ActionProcessor + 'static,
    {
        self.insert(kind, Arc::new(processor));
        self
    }

    pub fn insert<K: Into<ActionKind>>(&mut self, kind: K, processor: Arc<dyn ActionProcessor>) {
        let kind = kind.into();
        if self.processors.insert(kind.clone(), processor).is_some() {
            log::warn!("Replacing processor registered for action kind '{kind}'");
        }
    }

    pub fn contains(&self, kind: &ActionKind) -> bool {
        self.processors.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &ActionKind> {
        self.processors.keys()
    }
}

#[async_trait]
impl ActionProcessor for ProcessorRegistry {
    async fn process(&self, record: &ActionRecord) -> Result<(), ProcessError> {
        match self.processors.get(&record.kind) {
            Some(processor) => processor.process(record).await,
            None => Err(ProcessError::Permanent(format!(
                "no processor registered for action kind '{}'",
                record.kind
            ))),
        }
    }
}
