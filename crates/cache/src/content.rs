//! Content layer: read-only snapshots of content nodes plus derived
//! storyfragment belief registries. Long TTL; purged by invalidation
//! signals from the authoring API.

use std::sync::Arc;
use std::time::Duration;

use tractstack_core::config::CacheConfig;
use tractstack_core::registry::StoryfragmentBeliefRegistry;
use tractstack_core::types::{Belief, FileNode, Menu, Pane, Resource, StoryFragment, TractStack};
use tracing::debug;

use crate::layer::CacheLayer;

/// Everything the content layer can hold. Slug entries alias the id entry
/// so slug lookups stay one extra hop, not a duplicate snapshot.
#[derive(Debug, Clone)]
pub enum ContentValue {
    Pane(Pane),
    StoryFragment(StoryFragment),
    TractStack(TractStack),
    Menu(Menu),
    Resource(Resource),
    Belief(Belief),
    File(FileNode),
    Registry(StoryfragmentBeliefRegistry),
    Alias(String),
}

/// Entity kinds named by invalidation signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Pane,
    StoryFragment,
    TractStack,
    Menu,
    Resource,
    Belief,
    File,
}

impl ContentKind {
    fn prefix(&self) -> &'static str {
        match self {
            ContentKind::Pane => "pane",
            ContentKind::StoryFragment => "sf",
            ContentKind::TractStack => "ts",
            ContentKind::Menu => "menu",
            ContentKind::Resource => "resource",
            ContentKind::Belief => "belief",
            ContentKind::File => "file",
        }
    }
}

pub struct ContentLayer {
    layer: CacheLayer<ContentValue>,
}

impl ContentLayer {
    pub fn new(config: &CacheConfig) -> Self {
        let ttl = match config.content_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self {
            layer: CacheLayer::new("content", ttl, false, config.content_cap_bytes),
        }
    }

    fn get_value(&self, tenant_id: &str, key: &str) -> Option<Arc<ContentValue>> {
        match self.layer.get(tenant_id, key) {
            Some(value) => match value.as_ref() {
                ContentValue::Alias(target) => self.layer.get(tenant_id, target),
                _ => Some(value),
            },
            None => None,
        }
    }

    fn set_node(&self, tenant_id: &str, kind: ContentKind, id: &str, slug: Option<&str>, value: ContentValue, size: usize) {
        let id_key = format!("{}:{id}", kind.prefix());
        if let Some(slug) = slug {
            self.layer.set(
                tenant_id,
                &format!("{}:slug:{slug}", kind.prefix()),
                ContentValue::Alias(id_key.clone()),
                None,
                slug.len() + id_key.len(),
            );
        }
        self.layer.set(tenant_id, &id_key, value, None, size);
    }

    // ─── Typed accessors ────────────────────────────────────────────────

    pub fn set_pane(&self, tenant_id: &str, pane: Pane) {
        let size = estimate_size(&pane);
        let (id, slug) = (pane.id.clone(), pane.slug.clone());
        self.set_node(tenant_id, ContentKind::Pane, &id, Some(&slug), ContentValue::Pane(pane), size);
    }

    pub fn get_pane(&self, tenant_id: &str, id_or_slug: &str) -> Option<Pane> {
        self.get_first(
            tenant_id,
            &[
                format!("pane:{id_or_slug}"),
                format!("pane:slug:{id_or_slug}"),
            ],
        )
        .and_then(|v| match v.as_ref() {
            ContentValue::Pane(p) => Some(p.clone()),
            _ => None,
        })
    }

    pub fn set_storyfragment(&self, tenant_id: &str, fragment: StoryFragment) {
        let size = estimate_size(&fragment);
        let (id, slug) = (fragment.id.clone(), fragment.slug.clone());
        self.set_node(
            tenant_id,
            ContentKind::StoryFragment,
            &id,
            Some(&slug),
            ContentValue::StoryFragment(fragment),
            size,
        );
    }

    pub fn get_storyfragment(&self, tenant_id: &str, id_or_slug: &str) -> Option<StoryFragment> {
        self.get_first(
            tenant_id,
            &[format!("sf:{id_or_slug}"), format!("sf:slug:{id_or_slug}")],
        )
        .and_then(|v| match v.as_ref() {
            ContentValue::StoryFragment(sf) => Some(sf.clone()),
            _ => None,
        })
    }

    pub fn set_tractstack(&self, tenant_id: &str, ts: TractStack) {
        let size = estimate_size(&ts);
        let (id, slug) = (ts.id.clone(), ts.slug.clone());
        self.set_node(tenant_id, ContentKind::TractStack, &id, Some(&slug), ContentValue::TractStack(ts), size);
    }

    pub fn get_tractstack(&self, tenant_id: &str, id_or_slug: &str) -> Option<TractStack> {
        self.get_first(
            tenant_id,
            &[format!("ts:{id_or_slug}"), format!("ts:slug:{id_or_slug}")],
        )
        .and_then(|v| match v.as_ref() {
            ContentValue::TractStack(ts) => Some(ts.clone()),
            _ => None,
        })
    }

    pub fn set_menu(&self, tenant_id: &str, menu: Menu) {
        let size = estimate_size(&menu);
        let id = menu.id.clone();
        self.set_node(tenant_id, ContentKind::Menu, &id, None, ContentValue::Menu(menu), size);
    }

    pub fn get_menu(&self, tenant_id: &str, id: &str) -> Option<Menu> {
        self.get_value(tenant_id, &format!("menu:{id}"))
            .and_then(|v| match v.as_ref() {
                ContentValue::Menu(m) => Some(m.clone()),
                _ => None,
            })
    }

    pub fn set_resource(&self, tenant_id: &str, resource: Resource) {
        let size = estimate_size(&resource);
        let (id, slug) = (resource.id.clone(), resource.slug.clone());
        self.set_node(tenant_id, ContentKind::Resource, &id, Some(&slug), ContentValue::Resource(resource), size);
    }

    pub fn get_resource(&self, tenant_id: &str, id_or_slug: &str) -> Option<Resource> {
        self.get_first(
            tenant_id,
            &[
                format!("resource:{id_or_slug}"),
                format!("resource:slug:{id_or_slug}"),
            ],
        )
        .and_then(|v| match v.as_ref() {
            ContentValue::Resource(r) => Some(r.clone()),
            _ => None,
        })
    }

    pub fn set_belief(&self, tenant_id: &str, belief: Belief) {
        let size = estimate_size(&belief);
        let (id, slug) = (belief.id.clone(), belief.slug.clone());
        self.set_node(tenant_id, ContentKind::Belief, &id, Some(&slug), ContentValue::Belief(belief), size);
    }

    pub fn get_belief(&self, tenant_id: &str, id_or_slug: &str) -> Option<Belief> {
        self.get_first(
            tenant_id,
            &[
                format!("belief:{id_or_slug}"),
                format!("belief:slug:{id_or_slug}"),
            ],
        )
        .and_then(|v| match v.as_ref() {
            ContentValue::Belief(b) => Some(b.clone()),
            _ => None,
        })
    }

    pub fn set_file(&self, tenant_id: &str, file: FileNode) {
        let size = estimate_size(&file);
        let id = file.id.clone();
        self.set_node(tenant_id, ContentKind::File, &id, None, ContentValue::File(file), size);
    }

    pub fn get_file(&self, tenant_id: &str, id: &str) -> Option<FileNode> {
        self.get_value(tenant_id, &format!("file:{id}"))
            .and_then(|v| match v.as_ref() {
                ContentValue::File(f) => Some(f.clone()),
                _ => None,
            })
    }

    // ─── Belief registries ──────────────────────────────────────────────

    pub fn set_registry(&self, tenant_id: &str, registry: StoryfragmentBeliefRegistry) {
        let size = estimate_size(&registry);
        let key = format!("sfbr:{}", registry.storyfragment_id);
        self.layer
            .set(tenant_id, &key, ContentValue::Registry(registry), None, size);
    }

    pub fn get_registry(
        &self,
        tenant_id: &str,
        storyfragment_id: &str,
    ) -> Option<Arc<StoryfragmentBeliefRegistry>> {
        self.get_value(tenant_id, &format!("sfbr:{storyfragment_id}"))
            .and_then(|v| match v.as_ref() {
                ContentValue::Registry(r) => Some(Arc::new(r.clone())),
                _ => None,
            })
    }

    // ─── Invalidation ───────────────────────────────────────────────────

    /// Handle an invalidation signal `(tenant, kind, id)`. Pane, fragment,
    /// and belief changes also drop every derived registry for the tenant,
    /// since registries embed constituent pane payloads.
    pub fn invalidate_node(&self, tenant_id: &str, kind: ContentKind, id: &str) {
        self.layer
            .invalidate(tenant_id, &format!("{}:{id}", kind.prefix()));
        if matches!(
            kind,
            ContentKind::Pane | ContentKind::StoryFragment | ContentKind::Belief
        ) {
            let dropped = self.layer.invalidate_prefix(tenant_id, "sfbr:");
            debug!(
                tenant = tenant_id,
                kind = ?kind,
                id = id,
                registries_dropped = dropped,
                "content invalidation"
            );
        }
    }

    pub fn invalidate_tenant(&self, tenant_id: &str) -> usize {
        self.layer.invalidate_tenant(tenant_id)
    }

    pub fn scan_keys(&self, tenant_id: &str) -> Vec<String> {
        self.layer.scan_keys(tenant_id)
    }

    pub fn sweep(&self) -> usize {
        self.layer.sweep()
    }

    fn get_first(&self, tenant_id: &str, keys: &[String]) -> Option<Arc<ContentValue>> {
        keys.iter().find_map(|k| self.get_value(tenant_id, k))
    }
}

/// Serialized length as the byte-cap estimate; close enough for eviction.
fn estimate_size<T: serde::Serialize>(value: &T) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(256)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tractstack_core::types::PaneOptions;

    fn pane(id: &str, slug: &str) -> Pane {
        Pane {
            id: id.to_string(),
            slug: slug.to_string(),
            title: "T".to_string(),
            options: PaneOptions::default(),
        }
    }

    #[test]
    fn test_slug_alias_resolves() {
        let layer = ContentLayer::new(&CacheConfig::default());
        layer.set_pane("t", pane("p1", "intro"));

        assert_eq!(layer.get_pane("t", "p1").map(|p| p.slug), Some("intro".to_string()));
        assert_eq!(layer.get_pane("t", "intro").map(|p| p.id), Some("p1".to_string()));
        assert!(layer.get_pane("other", "p1").is_none());
    }

    #[test]
    fn test_pane_invalidation_drops_registries() {
        use tractstack_core::registry::StoryfragmentBeliefRegistry;
        use tractstack_core::types::StoryFragment;

        let layer = ContentLayer::new(&CacheConfig::default());
        let fragment = StoryFragment {
            id: "sf1".to_string(),
            slug: "home".to_string(),
            title: "Home".to_string(),
            tract_stack_id: "ts1".to_string(),
            pane_ids: vec!["p1".to_string()],
        };
        let registry = StoryfragmentBeliefRegistry::build(&fragment, &[pane("p1", "intro")]);
        layer.set_registry("t", registry);
        assert!(layer.get_registry("t", "sf1").is_some());

        layer.invalidate_node("t", ContentKind::Pane, "p1");
        assert!(layer.get_registry("t", "sf1").is_none());
    }

    #[test]
    fn test_menu_invalidation_keeps_registries() {
        use tractstack_core::registry::StoryfragmentBeliefRegistry;
        use tractstack_core::types::StoryFragment;

        let layer = ContentLayer::new(&CacheConfig::default());
        let fragment = StoryFragment {
            id: "sf1".to_string(),
            slug: "home".to_string(),
            title: "Home".to_string(),
            tract_stack_id: "ts1".to_string(),
            pane_ids: Vec::new(),
        };
        layer.set_registry("t", StoryfragmentBeliefRegistry::build(&fragment, &[]));
        layer.invalidate_node("t", ContentKind::Menu, "m1");
        assert!(layer.get_registry("t", "sf1").is_some());
    }
}
