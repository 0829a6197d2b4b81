//! Cache-through content reads. Every lookup hits the content layer first
//! and populates it from the tenant's database on miss; a miss in both is
//! a hard miss the caller surfaces as 404.

use std::sync::Arc;

use tractstack_core::registry::StoryfragmentBeliefRegistry;
use tractstack_core::types::{Belief, FileNode, Menu, Pane, Resource, StoryFragment, TractStack};
use tractstack_core::{TractError, TractResult};
use tractstack_cache::TenantCache;
use tracing::debug;

use crate::content;
use crate::sqlite::TenantDb;

/// Shared content loader; clones are cheap (one Arc).
#[derive(Clone)]
pub struct ContentLoader {
    cache: Arc<TenantCache>,
}

impl ContentLoader {
    pub fn new(cache: Arc<TenantCache>) -> Self {
        Self { cache }
    }

    pub async fn pane(&self, db: &TenantDb, id_or_slug: &str) -> TractResult<Pane> {
        if let Some(pane) = self.cache.content.get_pane(&db.tenant_id, id_or_slug) {
            return Ok(pane);
        }
        let pane = content::load_pane(&db.pool, id_or_slug)
            .await?
            .ok_or_else(|| TractError::CacheMissHard(format!("pane {id_or_slug}")))?;
        self.cache.content.set_pane(&db.tenant_id, pane.clone());
        Ok(pane)
    }

    pub async fn storyfragment(&self, db: &TenantDb, id_or_slug: &str) -> TractResult<StoryFragment> {
        if let Some(fragment) = self.cache.content.get_storyfragment(&db.tenant_id, id_or_slug) {
            return Ok(fragment);
        }
        let fragment = content::load_storyfragment(&db.pool, id_or_slug)
            .await?
            .ok_or_else(|| TractError::CacheMissHard(format!("storyfragment {id_or_slug}")))?;
        self.cache
            .content
            .set_storyfragment(&db.tenant_id, fragment.clone());
        Ok(fragment)
    }

    pub async fn belief(&self, db: &TenantDb, id_or_slug: &str) -> TractResult<Belief> {
        if let Some(belief) = self.cache.content.get_belief(&db.tenant_id, id_or_slug) {
            return Ok(belief);
        }
        let belief = content::load_belief(&db.pool, id_or_slug)
            .await?
            .ok_or_else(|| TractError::BeliefUnknown(id_or_slug.to_string()))?;
        self.cache.content.set_belief(&db.tenant_id, belief.clone());
        Ok(belief)
    }

    pub async fn tractstack(&self, db: &TenantDb, id_or_slug: &str) -> TractResult<TractStack> {
        if let Some(ts) = self.cache.content.get_tractstack(&db.tenant_id, id_or_slug) {
            return Ok(ts);
        }
        let ts = content::load_tractstack(&db.pool, id_or_slug)
            .await?
            .ok_or_else(|| TractError::CacheMissHard(format!("tractstack {id_or_slug}")))?;
        self.cache.content.set_tractstack(&db.tenant_id, ts.clone());
        Ok(ts)
    }

    pub async fn menu(&self, db: &TenantDb, id: &str) -> TractResult<Menu> {
        if let Some(menu) = self.cache.content.get_menu(&db.tenant_id, id) {
            return Ok(menu);
        }
        let menu = content::load_menu(&db.pool, id)
            .await?
            .ok_or_else(|| TractError::CacheMissHard(format!("menu {id}")))?;
        self.cache.content.set_menu(&db.tenant_id, menu.clone());
        Ok(menu)
    }

    pub async fn resource(&self, db: &TenantDb, id_or_slug: &str) -> TractResult<Resource> {
        if let Some(resource) = self.cache.content.get_resource(&db.tenant_id, id_or_slug) {
            return Ok(resource);
        }
        let resource = content::load_resource(&db.pool, id_or_slug)
            .await?
            .ok_or_else(|| TractError::CacheMissHard(format!("resource {id_or_slug}")))?;
        self.cache
            .content
            .set_resource(&db.tenant_id, resource.clone());
        Ok(resource)
    }

    pub async fn file(&self, db: &TenantDb, id: &str) -> TractResult<FileNode> {
        if let Some(file) = self.cache.content.get_file(&db.tenant_id, id) {
            return Ok(file);
        }
        let file = content::load_file(&db.pool, id)
            .await?
            .ok_or_else(|| TractError::CacheMissHard(format!("file {id}")))?;
        self.cache.content.set_file(&db.tenant_id, file.clone());
        Ok(file)
    }

    /// The belief registry for a story fragment, building it on first
    /// touch: walk every constituent pane, extract gates, transpose.
    pub async fn registry(
        &self,
        db: &TenantDb,
        storyfragment_id: &str,
    ) -> TractResult<Arc<StoryfragmentBeliefRegistry>> {
        if let Some(registry) = self.cache.content.get_registry(&db.tenant_id, storyfragment_id) {
            return Ok(registry);
        }

        let fragment = self.storyfragment(db, storyfragment_id).await?;
        let mut panes = Vec::with_capacity(fragment.pane_ids.len());
        for pane_id in &fragment.pane_ids {
            match self.pane(db, pane_id).await {
                Ok(pane) => panes.push(pane),
                Err(TractError::CacheMissHard(_)) => {
                    debug!(pane = pane_id, "fragment references missing pane");
                }
                Err(e) => return Err(e),
            }
        }

        let registry = StoryfragmentBeliefRegistry::build(&fragment, &panes);
        self.cache
            .content
            .set_registry(&db.tenant_id, registry.clone());
        Ok(Arc::new(registry))
    }
}
