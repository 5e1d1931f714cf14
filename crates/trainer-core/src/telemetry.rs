use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::SymbolSource;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CounterKey {
    action_id: String,
    address_source: SymbolSource,
    succeeded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryEntry {
    pub action_id: String,
    pub address_source: SymbolSource,
    pub succeeded: bool,
    pub count: u64,
}

/// Execution counters keyed by (action, address source, success).
///
/// All reads and increments go through one lock.
#[derive(Debug, Default)]
pub struct ActionTelemetry {
    counters: Mutex<HashMap<CounterKey, u64>>,
}

impl ActionTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, action_id: &str, address_source: SymbolSource, succeeded: bool) {
        let key = CounterKey {
            action_id: action_id.to_string(),
            address_source,
            succeeded,
        };
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *counters.entry(key).or_insert(0) += 1;
    }

    /// Counters sorted by action id, then source, then failures first.
    pub fn snapshot(&self) -> Vec<TelemetryEntry> {
        let counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut entries: Vec<TelemetryEntry> = counters
            .iter()
            .map(|(key, count)| TelemetryEntry {
                action_id: key.action_id.clone(),
                address_source: key.address_source,
                succeeded: key.succeeded,
                count: *count,
            })
            .collect();
        entries.sort_by(|a, b| {
            a.action_id
                .cmp(&b.action_id)
                .then(a.address_source.cmp(&b.address_source))
                .then(a.succeeded.cmp(&b.succeeded))
        });
        entries
    }

    pub fn count(&self, action_id: &str, address_source: SymbolSource, succeeded: bool) -> u64 {
        let key = CounterKey {
            action_id: action_id.to_string(),
            address_source,
            succeeded,
        };
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&key)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn record_increments_matching_key_only() {
        let telemetry = ActionTelemetry::new();
        telemetry.record("set_credits", SymbolSource::Signature, true);
        telemetry.record("set_credits", SymbolSource::Signature, true);
        telemetry.record("set_credits", SymbolSource::Signature, false);
        assert_eq!(telemetry.count("set_credits", SymbolSource::Signature, true), 2);
        assert_eq!(telemetry.count("set_credits", SymbolSource::Signature, false), 1);
        assert_eq!(telemetry.count("set_credits", SymbolSource::Fallback, true), 0);
    }

    #[test]
    fn snapshot_is_sorted() {
        let telemetry = ActionTelemetry::new();
        telemetry.record("toggle_ai", SymbolSource::None, true);
        telemetry.record("set_credits", SymbolSource::Fallback, true);
        telemetry.record("set_credits", SymbolSource::Signature, true);
        let ids: Vec<_> = telemetry
            .snapshot()
            .into_iter()
            .map(|e| (e.action_id, e.address_source))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("set_credits".to_string(), SymbolSource::Signature),
                ("set_credits".to_string(), SymbolSource::Fallback),
                ("toggle_ai".to_string(), SymbolSource::None),
            ]
        );
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let telemetry = Arc::new(ActionTelemetry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&telemetry);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        t.record("set_credits", SymbolSource::Signature, true);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(telemetry.count("set_credits", SymbolSource::Signature, true), 800);
    }
}
