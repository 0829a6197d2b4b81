//! Pane fragment endpoint: belief-aware, content-addressed cached HTML.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Html;
use serde::Deserialize;
use tractstack_cache::belief_context_fingerprint;
use tractstack_core::types::BeliefMap;
use tractstack_render::{filter_beliefs, render_pane};

use crate::context::AppContext;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct FragmentQuery {
    #[serde(default)]
    pub session: Option<String>,
}

/// GET /fragments/panes/:id — render one pane for the caller's belief
/// context. Cache key is `(tenant, pane, hash(filtered beliefs))`; the
/// renderer itself never sees global state.
pub async fn handle_pane_fragment(
    State(ctx): State<Arc<AppContext>>,
    Path(pane_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<FragmentQuery>,
) -> Result<Html<String>, ApiError> {
    let tenant = ctx.tenant(&headers)?;
    let db = tenant.db().await?;
    let pane = ctx.loader.pane(&db, &pane_id).await?;

    let user_beliefs = match ctx.session_id(&headers, query.session.as_deref()) {
        Some(session_id) => match ctx
            .cache
            .user_state
            .get_session(&tenant.tenant_id, session_id)
        {
            Some(session) => {
                ctx.beliefs
                    .load_state(&db, &session.fingerprint_id)
                    .await?
                    .held_beliefs
            }
            None => BeliefMap::new(),
        },
        None => BeliefMap::new(),
    };

    let filtered = filter_beliefs(&pane, &user_beliefs);
    let hash = belief_context_fingerprint(&filtered);

    if let Some(cached) = ctx.cache.fragments.get(&tenant.tenant_id, &pane.id, &hash) {
        metrics::counter!("fragments_cache_hit").increment(1);
        return Ok(Html(cached.as_ref().clone()));
    }
    metrics::counter!("fragments_cache_miss").increment(1);

    let html = render_pane(&pane, &filtered);
    ctx.cache
        .fragments
        .set(&tenant.tenant_id, &pane.id, &hash, html.clone());
    Ok(Html(html))
}
