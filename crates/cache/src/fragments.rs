//! HTML-fragment layer: rendered pane HTML keyed by
//! `(tenant, pane, belief-context fingerprint)`. Sliding 10-minute TTL and
//! a byte cap, since rendered fragments are pure derived data.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tractstack_core::config::CacheConfig;
use tractstack_core::types::BeliefMap;

use crate::layer::CacheLayer;

/// Stable hash of the user-belief subset relevant to one pane. The map is
/// ordered (BTreeMap) so serialization is canonical and the key is stable
/// across processes.
pub fn belief_context_fingerprint(filtered_beliefs: &BeliefMap) -> String {
    let canonical = serde_json::to_vec(filtered_beliefs).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    hex::encode(&digest[..16])
}

pub struct FragmentLayer {
    layer: CacheLayer<String>,
}

impl FragmentLayer {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            layer: CacheLayer::new(
                "fragments",
                Some(Duration::from_secs(config.fragment_ttl_secs)),
                true,
                config.fragment_cap_bytes,
            ),
        }
    }

    pub fn get(&self, tenant_id: &str, pane_id: &str, belief_hash: &str) -> Option<Arc<String>> {
        self.layer.get(tenant_id, &format!("{pane_id}:{belief_hash}"))
    }

    pub fn set(&self, tenant_id: &str, pane_id: &str, belief_hash: &str, html: String) {
        let size = html.len();
        self.layer
            .set(tenant_id, &format!("{pane_id}:{belief_hash}"), html, None, size);
    }

    /// Drop every cached rendering of one pane, all belief contexts.
    pub fn invalidate_pane(&self, tenant_id: &str, pane_id: &str) -> usize {
        self.layer.invalidate_prefix(tenant_id, &format!("{pane_id}:"))
    }

    pub fn invalidate_tenant(&self, tenant_id: &str) -> usize {
        self.layer.invalidate_tenant(tenant_id)
    }

    pub fn sweep(&self) -> usize {
        self.layer.sweep()
    }

    pub fn total_bytes(&self) -> usize {
        self.layer.total_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beliefs(pairs: &[(&str, &[&str])]) -> BeliefMap {
        pairs
            .iter()
            .map(|(slug, values)| {
                (
                    slug.to_string(),
                    values.iter().map(|v| v.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_fingerprint_is_stable_and_order_independent() {
        let a = beliefs(&[("mood", &["happy"]), ("tier", &["gold"])]);
        let b = beliefs(&[("tier", &["gold"]), ("mood", &["happy"])]);
        assert_eq!(belief_context_fingerprint(&a), belief_context_fingerprint(&b));
        assert_eq!(belief_context_fingerprint(&a).len(), 32);
    }

    #[test]
    fn test_fingerprint_differs_on_value_change() {
        let a = beliefs(&[("mood", &["happy"])]);
        let b = beliefs(&[("mood", &["sad"])]);
        assert_ne!(belief_context_fingerprint(&a), belief_context_fingerprint(&b));
    }

    #[test]
    fn test_pane_invalidation_drops_all_contexts() {
        let layer = FragmentLayer::new(&CacheConfig::default());
        layer.set("t", "p1", "aaaa", "<div>a</div>".to_string());
        layer.set("t", "p1", "bbbb", "<div>b</div>".to_string());
        layer.set("t", "p2", "aaaa", "<div>c</div>".to_string());

        assert_eq!(layer.invalidate_pane("t", "p1"), 2);
        assert!(layer.get("t", "p1", "aaaa").is_none());
        assert!(layer.get("t", "p2", "aaaa").is_some());
    }
}
