//! Fingerprint and visit lifecycle plus belief-state rehydration from the
//! durable `heldbeliefs` table.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tractstack_core::types::{BeliefMap, FingerprintState};
use tractstack_core::{TractError, TractResult};
use tracing::debug;

/// Rebuild a fingerprint's belief vector from durable rows. Slug
/// translation happens here: `heldbeliefs` keys by belief id, the cache
/// keys by slug.
pub async fn rehydrate_fingerprint(
    pool: &SqlitePool,
    fingerprint_id: &str,
) -> TractResult<FingerprintState> {
    let rows = sqlx::query(
        "SELECT b.slug, h.verb, h.object
         FROM heldbeliefs h JOIN beliefs b ON b.id = h.belief_id
         WHERE h.fingerprint_id = ?1",
    )
    .bind(fingerprint_id)
    .fetch_all(pool)
    .await
    .map_err(|e| TractError::Persistence(e.to_string()))?;

    let mut held_beliefs = BeliefMap::new();
    for row in &rows {
        let slug: String = row.get("slug");
        let verb: String = row.get("verb");
        let object: Option<String> = row.get("object");
        let value = if verb == "IDENTIFY_AS" {
            object.unwrap_or(verb)
        } else {
            verb
        };
        held_beliefs.insert(slug, vec![value]);
    }

    debug!(
        fingerprint = fingerprint_id,
        beliefs = held_beliefs.len(),
        "fingerprint rehydrated from store"
    );

    let mut state = FingerprintState::new(fingerprint_id.to_string());
    state.held_beliefs = held_beliefs;
    Ok(state)
}

/// True if the fingerprint has a durable row (distinguishes an evicted
/// visitor from a brand-new one).
pub async fn fingerprint_exists(pool: &SqlitePool, fingerprint_id: &str) -> TractResult<bool> {
    let row = sqlx::query("SELECT 1 FROM fingerprints WHERE id = ?1")
        .bind(fingerprint_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| TractError::Persistence(e.to_string()))?;
    Ok(row.is_some())
}

/// Durable held-belief rows for one fingerprint, as `(belief_id, verb,
/// object)`. Test and reconciliation hook.
pub async fn held_belief_rows(
    pool: &SqlitePool,
    fingerprint_id: &str,
) -> TractResult<Vec<(String, String, Option<String>)>> {
    let rows = sqlx::query(
        "SELECT belief_id, verb, object FROM heldbeliefs WHERE fingerprint_id = ?1 ORDER BY belief_id",
    )
    .bind(fingerprint_id)
    .fetch_all(pool)
    .await
    .map_err(|e| TractError::Persistence(e.to_string()))?;

    Ok(rows
        .iter()
        .map(|row| (row.get("belief_id"), row.get("verb"), row.get("object")))
        .collect())
}
