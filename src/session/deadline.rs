//! Size-proportional session deadlines.

use std::time::Duration;

/// Slowest transfer rate a session is budgeted for: 100 KiB/s.
pub const DEFAULT_FLOOR_BYTES_PER_SEC: u64 = 100 * 1024;

/// Computes how long a session may run for a given selection size.
///
/// `deadline = min(max(minimum, bytes / floor) + buffer, maximum)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlinePolicy {
    /// Lower bound on the estimated transfer time.
    pub minimum: Duration,
    /// Slack added on top of the estimate.
    pub buffer: Duration,
    /// Hard cap on any session.
    pub maximum: Duration,
    /// Budgeted transfer rate in bytes per second.
    pub floor_bytes_per_sec: u64,
}

impl Default for DeadlinePolicy {
    fn default() -> Self {
        Self {
            minimum: Duration::from_secs(2 * 3600),
            buffer: Duration::from_secs(30 * 60),
            maximum: Duration::from_secs(6 * 3600),
            floor_bytes_per_sec: DEFAULT_FLOOR_BYTES_PER_SEC,
        }
    }
}

impl DeadlinePolicy {
    /// Deadline for transferring `bytes`.
    #[must_use]
    pub fn deadline_for(&self, bytes: u64) -> Duration {
        let estimated = Duration::from_secs(bytes / self.floor_bytes_per_sec.max(1));
        (estimated.max(self.minimum) + self.buffer).min(self.maximum)
    }
}
