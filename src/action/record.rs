use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::common::timestamp::HybridTimestamp;

/// Queue-assigned identifier. Monotonically increasing per queue, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActionId(pub u64);

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mutation type tag used to pick the processor for a record, e.g. `"task.complete"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionKind(String);

impl ActionKind {
    pub fn new<T: Into<String>>(kind: T) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

impl From<String> for ActionKind {
    fn from(kind: String) -> Self {
        Self(kind)
    }
}

/// A deferred mutation waiting in the queue.
///
/// Records are values: the sync processor never edits one in place, it
/// produces the next version through [`ActionRecord::with_failure`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: ActionId,
    pub kind: ActionKind,
    pub payload: Vec<u8>,
    pub enqueued_at: HybridTimestamp,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl ActionRecord {
    pub fn new(
        id: ActionId,
        kind: ActionKind,
        payload: Vec<u8>,
        enqueued_at: HybridTimestamp,
    ) -> Self {
        Self {
            id,
            kind,
            payload,
            enqueued_at,
            retry_count: 0,
            last_error: None,
        }
    }

    /// The record as it looks after one more failed attempt.
    pub fn with_failure(&self, error: impl Into<String>) -> Self {
        Self {
            retry_count: self.retry_count.saturating_add(1),
            last_error: Some(error.into()),
            ..self.clone()
        }
    }

    /// Decode a JSON payload written by [`encode_json_payload`].
    pub fn payload_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

pub fn encode_json_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Clock;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct CompleteTask {
        task_id: String,
        done: bool,
    }

    #[test]
    fn with_failure_increments_and_keeps_identity() {
        let clock = Clock::new(1);
        let record = ActionRecord::new(ActionId(7), "task.complete".into(), vec![1], clock.now());

        let failed = record.with_failure("boom");
        assert_eq!(failed.id, ActionId(7));
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.last_error.as_deref(), Some("boom"));
        assert_eq!(failed.enqueued_at, record.enqueued_at);
        // the original value is untouched
        assert_eq!(record.retry_count, 0);
        assert!(record.last_error.is_none());
    }

    #[test]
    fn json_payload_decodes_back() {
        let clock = Clock::new(1);
        let payload = encode_json_payload(&CompleteTask {
            task_id: "t-1".to_string(),
            done: true,
        })
        .unwrap();
        let record = ActionRecord::new(ActionId(1), "task.complete".into(), payload, clock.now());

        let decoded: CompleteTask = record.payload_json().unwrap();
        assert_eq!(decoded.task_id, "t-1");
        assert!(decoded.done);
    }

    #[test]
    fn kind_displays_raw_tag() {
        let kind = ActionKind::new("budget.upsert");
        assert_eq!(kind.to_string(), "budget.upsert");
        assert_eq!(kind.as_str(), "budget.upsert");
    }
}
