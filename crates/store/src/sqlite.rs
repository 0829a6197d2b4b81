//! SQLite pool management and schema bootstrap. Each tenant owns one
//! database file; pools are opened lazily by the tenant registry and
//! closed on tenant eviction.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

/// A tenant id paired with its open pool. The smallest handle the write
/// path needs; the full tenant context stays in the registry crate.
#[derive(Clone)]
pub struct TenantDb {
    pub tenant_id: String,
    pub pool: SqlitePool,
}

impl TenantDb {
    pub fn new(tenant_id: impl Into<String>, pool: SqlitePool) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            pool,
        }
    }
}

/// Open (creating if missing) the database at `db_path` and ensure the
/// schema exists.
pub async fn open_database(db_path: &Path) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let options = SqliteConnectOptions::from_str(&format!(
        "sqlite:{display}",
        display = db_path.display()
    ))?
    .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    ensure_schema(&pool).await?;

    info!(path = %db_path.display(), "tenant database opened");
    Ok(pool)
}

/// In-memory database for tests. A single connection so every query sees
/// the same memory store.
pub async fn open_memory_database() -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    ensure_schema(&pool).await?;
    Ok(pool)
}

/// Create the tables the engine reads and writes. Idempotent.
pub async fn ensure_schema(pool: &SqlitePool) -> anyhow::Result<()> {
    let statements = [
        r"CREATE TABLE IF NOT EXISTS fingerprints (
            id TEXT PRIMARY KEY,
            lead_id TEXT,
            created_at TEXT NOT NULL
        )",
        r"CREATE TABLE IF NOT EXISTS visits (
            id TEXT PRIMARY KEY,
            fingerprint_id TEXT NOT NULL,
            campaign_id TEXT,
            created_at TEXT NOT NULL
        )",
        r"CREATE TABLE IF NOT EXISTS actions (
            id TEXT PRIMARY KEY,
            object_id TEXT NOT NULL,
            object_type TEXT NOT NULL,
            verb TEXT NOT NULL,
            duration INTEGER,
            visit_id TEXT NOT NULL,
            fingerprint_id TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        r"CREATE TABLE IF NOT EXISTS heldbeliefs (
            id TEXT PRIMARY KEY,
            belief_id TEXT NOT NULL,
            fingerprint_id TEXT NOT NULL,
            verb TEXT NOT NULL,
            object TEXT,
            updated_at TEXT NOT NULL,
            UNIQUE (belief_id, fingerprint_id)
        )",
        r"CREATE TABLE IF NOT EXISTS beliefs (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL DEFAULT '',
            scale TEXT NOT NULL,
            custom_values TEXT
        )",
        r"CREATE TABLE IF NOT EXISTS panes (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL DEFAULT '',
            options_payload TEXT NOT NULL DEFAULT '{}'
        )",
        r"CREATE TABLE IF NOT EXISTS storyfragments (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL DEFAULT '',
            tractstack_id TEXT NOT NULL DEFAULT ''
        )",
        r"CREATE TABLE IF NOT EXISTS storyfragment_panes (
            storyfragment_id TEXT NOT NULL,
            pane_id TEXT NOT NULL,
            weight INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (storyfragment_id, pane_id)
        )",
        r"CREATE TABLE IF NOT EXISTS tractstacks (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL DEFAULT ''
        )",
        r"CREATE TABLE IF NOT EXISTS menus (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            theme TEXT NOT NULL DEFAULT '',
            options_payload TEXT NOT NULL DEFAULT '[]'
        )",
        r"CREATE TABLE IF NOT EXISTS resources (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL DEFAULT '',
            category TEXT,
            options_payload TEXT NOT NULL DEFAULT '{}'
        )",
        r"CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            alt_description TEXT,
            url TEXT NOT NULL DEFAULT ''
        )",
        r"CREATE INDEX IF NOT EXISTS idx_actions_fingerprint
            ON actions (fingerprint_id, created_at)",
        r"CREATE INDEX IF NOT EXISTS idx_heldbeliefs_fingerprint
            ON heldbeliefs (fingerprint_id)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
