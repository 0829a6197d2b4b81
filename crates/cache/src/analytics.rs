//! Analytics layer: hour-bucketed event counters. Write-heavy, so counts
//! live in a DashMap sharded by key hash rather than the generic layer.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// UTC hour bucket key, `YYYY-MM-DD-HH`.
pub fn hour_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d-%H").to_string()
}

pub struct AnalyticsLayer {
    counters: DashMap<String, u64>,
}

impl AnalyticsLayer {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    /// Bump the counter for `(tenant, hour, object, verb)`.
    pub fn increment(&self, tenant_id: &str, object_id: &str, verb: &str, at: DateTime<Utc>) {
        let key = format!("{tenant_id}\u{1f}{}\u{1f}{object_id}\u{1f}{verb}", hour_key(at));
        *self.counters.entry(key).or_insert(0) += 1;
        metrics::counter!("analytics_increments").increment(1);
    }

    /// Counters for one tenant-hour as `(object_id, verb, count)` rows.
    pub fn snapshot_hour(&self, tenant_id: &str, hour: &str) -> Vec<(String, String, u64)> {
        let prefix = format!("{tenant_id}\u{1f}{hour}\u{1f}");
        self.counters
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .filter_map(|e| {
                let rest = &e.key()[prefix.len()..];
                let (object_id, verb) = rest.split_once('\u{1f}')?;
                Some((object_id.to_string(), verb.to_string(), *e.value()))
            })
            .collect()
    }

    pub fn invalidate_tenant(&self, tenant_id: &str) -> usize {
        let prefix = format!("{tenant_id}\u{1f}");
        let before = self.counters.len();
        self.counters.retain(|key, _| !key.starts_with(&prefix));
        before - self.counters.len()
    }

    /// Drop buckets older than the retention horizon. Hour keys sort
    /// lexicographically in time order, so a string compare suffices.
    pub fn prune_before(&self, horizon: DateTime<Utc>) -> usize {
        let cutoff = hour_key(horizon);
        let before = self.counters.len();
        self.counters.retain(|key, _| {
            key.split('\u{1f}')
                .nth(1)
                .map(|hour| *hour >= *cutoff)
                .unwrap_or(false)
        });
        before - self.counters.len()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl Default for AnalyticsLayer {
    fn default() -> Self {
        Self::new()
    }
}
