//! Per-tenant resources: identity, allowed domains, and the lazily opened
//! database pool. Immutable after load apart from the pool cell.

use std::collections::BTreeSet;
use std::path::PathBuf;

use sqlx::sqlite::SqlitePool;
use tokio::sync::OnceCell;
use tractstack_core::TractResult;
use tractstack_store::{open_database, TenantDb};

#[derive(Debug)]
pub struct TenantContext {
    pub tenant_id: String,
    pub allowed_domains: BTreeSet<String>,
    pub media_path: PathBuf,
    db_path: PathBuf,
    pool: OnceCell<SqlitePool>,
}

impl TenantContext {
    pub fn new(
        tenant_id: impl Into<String>,
        allowed_domains: impl IntoIterator<Item = String>,
        db_path: PathBuf,
        media_path: PathBuf,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            allowed_domains: allowed_domains.into_iter().collect(),
            media_path,
            db_path,
            pool: OnceCell::new(),
        }
    }

    /// The tenant's database handle, opened (and schema-bootstrapped) on
    /// first use.
    pub async fn db(&self) -> TractResult<TenantDb> {
        let pool = self
            .pool
            .get_or_try_init(|| open_database(&self.db_path))
            .await
            .map_err(tractstack_core::TractError::Internal)?;
        Ok(TenantDb::new(self.tenant_id.clone(), pool.clone()))
    }

    /// Close the pool if it was ever opened. Called on tenant eviction.
    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }

    pub fn domain_allowed(&self, host: &str) -> bool {
        self.allowed_domains.contains(host)
    }
}
