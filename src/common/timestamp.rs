use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uhlc::{Timestamp as HlcTimestamp, HLC};

/// Hybrid logical timestamp tagged with the device that produced it.
///
/// Ordering is total: HLC time first, then device id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HybridTimestamp {
    pub ts: HlcTimestamp,
    pub device_id: u64,
}

impl std::fmt::Display for HybridTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.ts, self.device_id)
    }
}

pub struct Clock {
    hlc: HLC,
    device_id: u64,
}

impl Clock {
    /// Create a new clock bound to a specific device id.
    pub fn new(device_id: u64) -> Self {
        Self {
            hlc: HLC::default(),
            device_id,
        }
    }

    /// Generate a new local timestamp for an enqueued action or optimistic write.
    pub fn now(&self) -> HybridTimestamp {
        HybridTimestamp {
            ts: self.hlc.new_timestamp(),
            device_id: self.device_id,
        }
    }

    /// Advance this clock past a timestamp recovered from persisted state.
    ///
    /// Call this when reloading records written by a previous process so new
    /// records always sort after old ones.
    pub fn observe(&self, seen: &HybridTimestamp) -> Result<(), String> {
        self.hlc.update_with_timestamp(&seen.ts)
    }
}

/// Wall-clock milliseconds since UNIX_EPOCH, saturating to zero on clock skew.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_timestamps_increase() {
        let clock = Clock::new(1);
        let t1 = clock.now();
        let t2 = clock.now();
        assert!(t2 > t1);
        assert_eq!(t1.device_id, 1);
        assert_eq!(t2.device_id, 1);
    }

    #[test]
    fn observe_keeps_new_timestamps_after_recovered_ones() {
        let restarted = Clock::new(1);
        let previous_run = Clock::new(2);

        let recovered = previous_run.now();
        restarted.observe(&recovered).expect("observe failed");

        let next = restarted.now();
        assert!(next.ts > recovered.ts);
        assert_eq!(next.device_id, 1);
    }

    #[test]
    fn unix_millis_is_after_2020() {
        assert!(unix_millis() > 1_577_836_800_000);
    }
}
