//! Once-per-condition error reporting
//!
//! A polling adapter that loses its data source would otherwise log the same
//! failure every poll interval. The reporter keeps the last condition per
//! slot: the first occurrence logs at `warn`, repeats drop to `debug`, and a
//! *changed* condition or a recovery logs at `warn`/`info` again.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Deduplicating condition reporter, shared per adapter or connection
#[derive(Debug, Clone, Default)]
pub struct ConditionReporter {
    scope: String,
    last: Arc<Mutex<HashMap<String, String>>>,
}

impl ConditionReporter {
    /// Reporter labeled with the owning adapter/connection name
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            last: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Report an error condition in `slot`
    ///
    /// Returns `true` when this condition was newly reported (first
    /// occurrence or changed text), which is when it reached the operator.
    pub fn report(&self, slot: &str, condition: &str) -> bool {
        let mut last = self.last.lock();
        match last.get(slot) {
            Some(prev) if prev == condition => {
                debug!(scope = %self.scope, slot, condition, "condition persists");
                false
            }
            _ => {
                last.insert(slot.to_string(), condition.to_string());
                warn!(scope = %self.scope, slot, condition, "condition raised");
                true
            }
        }
    }

    /// Mark `slot` as healthy again
    ///
    /// Logs a recovery only if a condition was actually pending.
    pub fn clear(&self, slot: &str) {
        if self.last.lock().remove(slot).is_some() {
            info!(scope = %self.scope, slot, "condition cleared");
        }
    }

    /// Whether a condition is currently pending in `slot`
    pub fn is_raised(&self, slot: &str) -> bool {
        self.last.lock().contains_key(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_report_is_visible_repeats_are_not() {
        let reporter = ConditionReporter::new("adc");
        assert!(reporter.report("read", "bus unreachable"));
        assert!(!reporter.report("read", "bus unreachable"));
        assert!(!reporter.report("read", "bus unreachable"));
    }

    #[test]
    fn test_changed_condition_is_visible_again() {
        let reporter = ConditionReporter::new("adc");
        assert!(reporter.report("read", "bus unreachable"));
        assert!(reporter.report("read", "conversion timeout"));
        assert!(!reporter.report("read", "conversion timeout"));
    }

    #[test]
    fn test_clear_resets_the_slot() {
        let reporter = ConditionReporter::new("adc");
        reporter.report("read", "bus unreachable");
        assert!(reporter.is_raised("read"));

        reporter.clear("read");
        assert!(!reporter.is_raised("read"));
        // Same text fires again after recovery
        assert!(reporter.report("read", "bus unreachable"));
    }

    #[test]
    fn test_slots_are_independent() {
        let reporter = ConditionReporter::new("adc");
        assert!(reporter.report("read", "x"));
        assert!(reporter.report("write", "x"));
    }
}
