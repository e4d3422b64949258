use serde::{Deserialize, Serialize};

use crate::action::{ActionRecord, ProcessError};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// How one attempt at a record ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Synced,
    Failed(ProcessError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    RetriesExhausted,
    Permanent,
}

/// What happens to a record after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Applied remotely; drop it from the queue.
    Done,
    /// Keep it queued, carrying the incremented retry count.
    Retain(ActionRecord),
    /// Abandon it.
    Evict(ActionRecord, EvictionReason),
}

/// Result of folding a whole pass through the policy.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reduction {
    /// Records to keep, in their original relative order.
    pub retained: Vec<ActionRecord>,
    pub evicted: Vec<(ActionRecord, EvictionReason)>,
    pub synced: usize,
}

/// Bounded retry with eviction.
///
/// A record is never observed in the queue with `retry_count >= max_retries`:
/// the failure that would bring it to the bound evicts it instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy {
    /// `max_retries` is clamped to at least 1.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn decide(&self, record: &ActionRecord, outcome: &Outcome) -> Disposition {
        let error = match outcome {
            Outcome::Synced => return Disposition::Done,
            Outcome::Failed(error) => error,
        };

        let failed = record.with_failure(error.to_string());
        if error.is_permanent() {
            Disposition::Evict(failed, EvictionReason::Permanent)
        } else if failed.retry_count < self.max_retries {
            Disposition::Retain(failed)
        } else {
            Disposition::Evict(failed, EvictionReason::RetriesExhausted)
        }
    }

    /// Fold the outcomes of a pass, given in snapshot order.
    pub fn reduce<I>(&self, attempts: I) -> Reduction
    where
        I: IntoIterator<Item = (ActionRecord, Outcome)>,
    {
        let mut reduction = Reduction::default();
        for (record, outcome) in attempts {
            match self.decide(&record, &outcome) {
                Disposition::Done => reduction.synced += 1,
                Disposition::Retain(next) => reduction.retained.push(next),
                Disposition::Evict(last, reason) => reduction.evicted.push((last, reason)),
            }
        }
        reduction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionId;
    use crate::common::Clock;

    fn record(id: u64, retry_count: u32) -> ActionRecord {
        let mut r = ActionRecord::new(ActionId(id), "k".into(), Vec::new(), Clock::new(1).now());
        r.retry_count = retry_count;
        r
    }

    fn fail() -> Outcome {
        Outcome::Failed(ProcessError::transient("offline"))
    }

    #[test]
    fn transient_failure_below_bound_is_retained() {
        let policy = RetryPolicy::new(3);
        match policy.decide(&record(1, 1), &fail()) {
            Disposition::Retain(next) => {
                assert_eq!(next.retry_count, 2);
                assert!(next.last_error.unwrap().contains("offline"));
            }
            other => panic!("expected Retain, got {other:?}"),
        }
    }

    #[test]
    fn failure_reaching_bound_evicts() {
        let policy = RetryPolicy::new(3);
        match policy.decide(&record(1, 2), &fail()) {
            Disposition::Evict(last, EvictionReason::RetriesExhausted) => {
                assert_eq!(last.retry_count, 3)
            }
            other => panic!("expected Evict, got {other:?}"),
        }
    }

    #[test]
    fn permanent_failure_evicts_immediately() {
        let policy = RetryPolicy::new(3);
        let outcome = Outcome::Failed(ProcessError::permanent("invalid budget"));
        assert!(matches!(
            policy.decide(&record(1, 0), &outcome),
            Disposition::Evict(_, EvictionReason::Permanent)
        ));
    }

    #[test]
    fn timeout_consumes_a_retry() {
        let policy = RetryPolicy::new(3);
        let outcome = Outcome::Failed(ProcessError::Timeout(std::time::Duration::from_secs(1)));
        assert!(matches!(
            policy.decide(&record(1, 0), &outcome),
            Disposition::Retain(ref r) if r.retry_count == 1
        ));
    }

    #[test]
    fn reduce_mixed_batch() {
        let policy = RetryPolicy::default();
        let reduction = policy.reduce(vec![
            (record(1, 0), Outcome::Synced),
            (record(2, 0), fail()),
            (record(3, 0), Outcome::Synced),
            (record(4, 2), fail()),
        ]);

        assert_eq!(reduction.synced, 2);
        assert_eq!(reduction.retained.len(), 1);
        assert_eq!(reduction.retained[0].id, ActionId(2));
        assert_eq!(reduction.retained[0].retry_count, 1);
        assert_eq!(reduction.evicted.len(), 1);
        assert_eq!(reduction.evicted[0].0.id, ActionId(4));
    }

    #[test]
    fn zero_bound_is_clamped() {
        assert_eq!(RetryPolicy::new(0).max_retries(), 1);
    }
}
