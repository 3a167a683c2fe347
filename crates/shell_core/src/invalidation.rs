use std::time::Duration;

use shared::keys::ViewKey;

/// Snapshot of one cached view instance as seen by a sweep.
pub struct SweepEntry {
    pub key: ViewKey,
    pub persistent: bool,
    /// Whether the instance is reachable through the active navigation
    /// stack (history index 1 through the current position).
    pub active: bool,
    pub age: Duration,
}

/// Decides which cached, non-persistent instances outside the active stack
/// get dropped. Policies are pure decisions; the orchestrator owns the
/// sweep timer and the actual teardown.
pub trait InvalidationPolicy: Send + Sync {
    /// Timer-driven policies sweep periodically until nothing remains
    /// eligible; the others run one sweep per invocation.
    fn periodic(&self) -> bool {
        false
    }

    fn decide(&self, entries: &[SweepEntry]) -> Vec<ViewKey>;
}

/// Invalidates instances not visited again within a fixed age.
pub struct TimeoutPolicy {
    max_age: Duration,
}

impl TimeoutPolicy {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }
}

impl InvalidationPolicy for TimeoutPolicy {
    fn periodic(&self) -> bool {
        true
    }

    fn decide(&self, entries: &[SweepEntry]) -> Vec<ViewKey> {
        entries
            .iter()
            .filter(|entry| !entry.persistent && !entry.active && entry.age > self.max_age)
            .map(|entry| entry.key.clone())
            .collect()
    }
}

/// Invalidates every eligible instance immediately.
pub struct DirectPolicy;

impl InvalidationPolicy for DirectPolicy {
    fn decide(&self, entries: &[SweepEntry]) -> Vec<ViewKey> {
        entries
            .iter()
            .filter(|entry| !entry.persistent && !entry.active)
            .map(|entry| entry.key.clone())
            .collect()
    }
}
