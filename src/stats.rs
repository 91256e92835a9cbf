//! Per-provider attempt/success counters used to reorder provider attempts.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::Serialize;

const NEUTRAL_SUCCESS_RATIO: f64 = 0.5;

/// Monotonic counters for one provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceStat {
    pub attempts: u64,
    pub successes: u64,
}

impl SourceStat {
    /// `successes / attempts`, or 0.5 for a provider that has never been tried.
    pub fn success_ratio(&self) -> f64 {
        if self.attempts == 0 {
            NEUTRAL_SUCCESS_RATIO
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct SourceStatsTracker {
    stats: Mutex<HashMap<String, SourceStat>>,
}

impl SourceStatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self, provider: &str) {
        let mut stats = self.stats.lock().expect("source stats lock poisoned");
        let entry = stats.entry(provider.to_string()).or_default();
        entry.attempts = entry.attempts.saturating_add(1);
    }

    pub fn record_success(&self, provider: &str) {
        let mut stats = self.stats.lock().expect("source stats lock poisoned");
        let entry = stats.entry(provider.to_string()).or_default();
        entry.successes = entry.successes.saturating_add(1);
    }

    pub fn stat(&self, provider: &str) -> SourceStat {
        self.stats
            .lock()
            .expect("source stats lock poisoned")
            .get(provider)
            .copied()
            .unwrap_or_default()
    }

    pub fn success_ratio(&self, provider: &str) -> f64 {
        self.stat(provider).success_ratio()
    }

    /// Sorts `items` by descending success ratio. Ties keep their given order.
    pub fn order_by_success<T>(&self, items: &mut [T], name_of: impl Fn(&T) -> &str) {
        let stats = self.stats.lock().expect("source stats lock poisoned");
        let ratio = |item: &T| {
            stats
                .get(name_of(item))
                .copied()
                .unwrap_or_default()
                .success_ratio()
        };
        items.sort_by(|left, right| ratio(right).total_cmp(&ratio(left)));
    }

    pub fn snapshot(&self) -> BTreeMap<String, SourceStat> {
        self.stats
            .lock()
            .expect("source stats lock poisoned")
            .iter()
            .map(|(name, stat)| (name.clone(), *stat))
            .collect()
    }
}
