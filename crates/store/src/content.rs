//! Row-level reads of content nodes. `options_payload` JSON is parsed here,
//! once, into the typed structures the rest of the engine consumes.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tractstack_core::types::{
    Belief, FileNode, Menu, MenuLink, Pane, PaneOptions, Resource, StoryFragment, TractStack,
};
use tractstack_core::TractResult;
use tracing::warn;

fn parse_pane_options(pane_id: &str, raw: &str) -> PaneOptions {
    match serde_json::from_str(raw) {
        Ok(options) => options,
        Err(e) => {
            warn!(pane = pane_id, error = %e, "malformed pane options payload");
            PaneOptions::default()
        }
    }
}

pub async fn load_pane(pool: &SqlitePool, id_or_slug: &str) -> TractResult<Option<Pane>> {
    let row = sqlx::query("SELECT id, slug, title, options_payload FROM panes WHERE id = ?1 OR slug = ?1")
        .bind(id_or_slug)
        .fetch_optional(pool)
        .await
        .map_err(|e| tractstack_core::TractError::Persistence(e.to_string()))?;

    Ok(row.map(|row| {
        let id: String = row.get("id");
        let raw: String = row.get("options_payload");
        let options = parse_pane_options(&id, &raw);
        Pane {
            id,
            slug: row.get("slug"),
            title: row.get("title"),
            options,
        }
    }))
}

pub async fn load_storyfragment(
    pool: &SqlitePool,
    id_or_slug: &str,
) -> TractResult<Option<StoryFragment>> {
    let row = sqlx::query("SELECT id, slug, title, tractstack_id FROM storyfragments WHERE id = ?1 OR slug = ?1")
        .bind(id_or_slug)
        .fetch_optional(pool)
        .await
        .map_err(|e| tractstack_core::TractError::Persistence(e.to_string()))?;

    let Some(row) = row else {
        return Ok(None);
    };
    let id: String = row.get("id");

    let pane_rows = sqlx::query(
        "SELECT pane_id FROM storyfragment_panes WHERE storyfragment_id = ?1 ORDER BY weight ASC",
    )
    .bind(&id)
    .fetch_all(pool)
    .await
    .map_err(|e| tractstack_core::TractError::Persistence(e.to_string()))?;

    Ok(Some(StoryFragment {
        id,
        slug: row.get("slug"),
        title: row.get("title"),
        tract_stack_id: row.get("tractstack_id"),
        pane_ids: pane_rows.iter().map(|r| r.get("pane_id")).collect(),
    }))
}

pub async fn load_belief(pool: &SqlitePool, id_or_slug: &str) -> TractResult<Option<Belief>> {
    let row = sqlx::query("SELECT id, slug, title, scale, custom_values FROM beliefs WHERE id = ?1 OR slug = ?1")
        .bind(id_or_slug)
        .fetch_optional(pool)
        .await
        .map_err(|e| tractstack_core::TractError::Persistence(e.to_string()))?;

    Ok(row.and_then(|row| {
        let id: String = row.get("id");
        let scale_raw: String = row.get("scale");
        let scale = match serde_json::from_value(serde_json::Value::String(scale_raw.clone())) {
            Ok(scale) => scale,
            Err(_) => {
                warn!(belief = id, scale = scale_raw, "unknown belief scale");
                return None;
            }
        };
        let custom_values: Option<String> = row.get("custom_values");
        Some(Belief {
            id,
            slug: row.get("slug"),
            title: row.get("title"),
            scale,
            custom_values: custom_values
                .and_then(|raw| serde_json::from_str(&raw).ok()),
        })
    }))
}

pub async fn load_tractstack(pool: &SqlitePool, id_or_slug: &str) -> TractResult<Option<TractStack>> {
    let row = sqlx::query("SELECT id, slug, title FROM tractstacks WHERE id = ?1 OR slug = ?1")
        .bind(id_or_slug)
        .fetch_optional(pool)
        .await
        .map_err(|e| tractstack_core::TractError::Persistence(e.to_string()))?;

    let Some(row) = row else {
        return Ok(None);
    };
    let id: String = row.get("id");

    let fragment_rows = sqlx::query("SELECT id FROM storyfragments WHERE tractstack_id = ?1")
        .bind(&id)
        .fetch_all(pool)
        .await
        .map_err(|e| tractstack_core::TractError::Persistence(e.to_string()))?;

    Ok(Some(TractStack {
        id,
        slug: row.get("slug"),
        title: row.get("title"),
        story_fragment_ids: fragment_rows.iter().map(|r| r.get("id")).collect(),
    }))
}

pub async fn load_menu(pool: &SqlitePool, id: &str) -> TractResult<Option<Menu>> {
    let row = sqlx::query("SELECT id, title, theme, options_payload FROM menus WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| tractstack_core::TractError::Persistence(e.to_string()))?;

    Ok(row.map(|row| {
        let raw: String = row.get("options_payload");
        let links: Vec<MenuLink> = serde_json::from_str(&raw).unwrap_or_default();
        Menu {
            id: row.get("id"),
            title: row.get("title"),
            theme: row.get("theme"),
            links,
        }
    }))
}

pub async fn load_resource(pool: &SqlitePool, id_or_slug: &str) -> TractResult<Option<Resource>> {
    let row = sqlx::query("SELECT id, slug, title, category, options_payload FROM resources WHERE id = ?1 OR slug = ?1")
        .bind(id_or_slug)
        .fetch_optional(pool)
        .await
        .map_err(|e| tractstack_core::TractError::Persistence(e.to_string()))?;

    Ok(row.map(|row| {
        let raw: String = row.get("options_payload");
        Resource {
            id: row.get("id"),
            slug: row.get("slug"),
            title: row.get("title"),
            category: row.get("category"),
            payload: serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null),
        }
    }))
}

pub async fn load_file(pool: &SqlitePool, id: &str) -> TractResult<Option<FileNode>> {
    let row = sqlx::query("SELECT id, filename, alt_description, url FROM files WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| tractstack_core::TractError::Persistence(e.to_string()))?;

    Ok(row.map(|row| FileNode {
        id: row.get("id"),
        filename: row.get("filename"),
        alt_description: row.get("alt_description"),
        url: row.get("url"),
    }))
}
