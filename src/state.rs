use serde::{Deserialize, Serialize};

/// Progress counters of one unit.
///
/// `calls_completed == success_count + failure_count <= calls_requested`
/// holds after every mutation. Retry-delays are tracked separately and never
/// consume a call slot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallState {
    calls_requested: u64,
    calls_completed: u64,
    success_count: u64,
    failure_count: u64,
    retry_count: u64,
}

impl CallState {
    pub fn new(calls_requested: u64) -> Self {
        Self {
            calls_requested,
            ..Self::default()
        }
    }

    pub fn calls_requested(&self) -> u64 {
        self.calls_requested
    }

    pub fn calls_completed(&self) -> u64 {
        self.calls_completed
    }

    pub fn success_count(&self) -> u64 {
        self.success_count
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    pub fn retry_count(&self) -> u64 {
        self.retry_count
    }

    pub fn remaining(&self) -> u64 {
        self.calls_requested.saturating_sub(self.calls_completed)
    }

    pub fn has_more_work(&self) -> bool {
        self.calls_completed < self.calls_requested
    }

    pub(crate) fn record_success(&mut self) {
        debug_assert!(self.has_more_work());
        self.success_count += 1;
        self.calls_completed += 1;
    }

    pub(crate) fn record_failure(&mut self) {
        debug_assert!(self.has_more_work());
        self.failure_count += 1;
        self.calls_completed += 1;
    }

    pub(crate) fn record_retry(&mut self) {
        self.retry_count += 1;
    }

    /// Counters decoded from an untrusted snapshot must still add up.
    pub(crate) fn is_consistent(&self) -> bool {
        self.success_count.checked_add(self.failure_count) == Some(self.calls_completed)
            && self.calls_completed <= self.calls_requested
    }
}
