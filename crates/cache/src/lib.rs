#![warn(clippy::unwrap_used)]

pub mod analytics;
pub mod content;
pub mod fragments;
pub mod layer;
pub mod user_state;

pub use analytics::AnalyticsLayer;
pub use content::{ContentKind, ContentLayer};
pub use fragments::{belief_context_fingerprint, FragmentLayer};
pub use layer::CacheLayer;
pub use user_state::UserStateLayer;

use tractstack_core::config::CacheConfig;
use tracing::debug;

/// The four cache layers behind one handle, shared across requests.
/// Every key is scoped by tenant id; no cross-tenant reads are possible.
pub struct TenantCache {
    pub content: ContentLayer,
    pub user_state: UserStateLayer,
    pub fragments: FragmentLayer,
    pub analytics: AnalyticsLayer,
}

impl TenantCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            content: ContentLayer::new(config),
            user_state: UserStateLayer::new(config),
            fragments: FragmentLayer::new(config),
            analytics: AnalyticsLayer::new(),
        }
    }

    /// Evict TTL-expired entries across all layers. Driven by a periodic
    /// task in the binary.
    pub fn maintenance(&self) {
        let evicted = self.content.sweep() + self.user_state.sweep() + self.fragments.sweep();
        if evicted > 0 {
            debug!(evicted = evicted, "cache sweep complete");
        }
    }

    /// Handle an invalidation signal `(tenant, kind, id)` from the
    /// authoring API. Pane changes also drop that pane's rendered HTML.
    pub fn invalidate_content(&self, tenant_id: &str, kind: ContentKind, id: &str) {
        self.content.invalidate_node(tenant_id, kind, id);
        if kind == ContentKind::Pane {
            self.fragments.invalidate_pane(tenant_id, id);
        }
    }

    /// Drop every cached entry belonging to one tenant, all layers.
    pub fn evict_tenant(&self, tenant_id: &str) {
        self.content.invalidate_tenant(tenant_id);
        self.user_state.invalidate_tenant(tenant_id);
        self.fragments.invalidate_tenant(tenant_id);
        self.analytics.invalidate_tenant(tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tractstack_core::types::FingerprintState;

    #[test]
    fn test_tenant_scoping_across_layers() {
        let cache = TenantCache::new(&CacheConfig::default());
        cache
            .user_state
            .set_fingerprint("tenant-a", FingerprintState::new("fp-1".to_string()));

        assert!(cache.user_state.get_fingerprint("tenant-a", "fp-1").is_some());
        assert!(cache.user_state.get_fingerprint("tenant-b", "fp-1").is_none());

        cache.evict_tenant("tenant-a");
        assert!(cache.user_state.get_fingerprint("tenant-a", "fp-1").is_none());
    }
}
