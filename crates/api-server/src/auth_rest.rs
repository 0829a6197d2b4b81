//! Session establishment, event submission, and the SSE stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::Json;
use chrono::Utc;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tractstack_core::events::EventBatch;
use tractstack_core::types::{SessionData, Visit};
use tractstack_core::{ids, TractError};
use tractstack_store::PersistOp;
use tracing::info;

use crate::context::AppContext;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitRequest {
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub visit_id: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitResponse {
    pub session_id: String,
    pub fingerprint_id: String,
    pub visit_id: String,
}

/// POST /auth/visit — establish or refresh a session.
pub async fn handle_visit(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(request): Json<VisitRequest>,
) -> Result<Json<VisitResponse>, ApiError> {
    let tenant = ctx.tenant(&headers)?;
    let db = tenant.db().await?;

    let fingerprint_id = request
        .fingerprint
        .filter(|id| ids::is_ulid(id))
        .unwrap_or_else(ids::new_id);

    let visit_id = match request.visit_id.filter(|id| ids::is_ulid(id)) {
        Some(existing) => existing,
        None => {
            let visit = Visit {
                id: ids::new_id(),
                fingerprint_id: fingerprint_id.clone(),
                campaign_id: request.campaign_id.clone(),
                created_at: Utc::now(),
            };
            ctx.persist
                .enqueue(db.pool.clone(), PersistOp::AppendVisit(visit.clone()));
            visit.id
        }
    };

    ctx.persist.enqueue(
        db.pool.clone(),
        PersistOp::EnsureFingerprint {
            fingerprint_id: fingerprint_id.clone(),
        },
    );

    let session_id = ids::new_id();
    ctx.cache.user_state.set_session(
        &tenant.tenant_id,
        SessionData {
            session_id: session_id.clone(),
            tenant_id: tenant.tenant_id.clone(),
            fingerprint_id: fingerprint_id.clone(),
            visit_id: visit_id.clone(),
        },
    );

    info!(tenant = %tenant.tenant_id, session = %session_id, "visit established");
    metrics::counter!("visits_established").increment(1);

    Ok(Json(VisitResponse {
        session_id,
        fingerprint_id,
        visit_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    #[serde(default)]
    pub session: Option<String>,
}

/// POST /auth/state — submit an event batch.
pub async fn handle_state(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Query(query): Query<StateQuery>,
    Json(batch): Json<EventBatch>,
) -> Result<StatusCode, ApiError> {
    let tenant = ctx.tenant(&headers)?;
    let session_id = ctx
        .session_id(&headers, query.session.as_deref())
        .ok_or_else(|| TractError::SessionUnknown("missing session id".to_string()))?
        .to_string();

    let db = tenant.db().await?;
    ctx.processor.process_batch(&db, &session_id, batch).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SseQuery {
    #[serde(default)]
    pub session: Option<String>,
    /// Story fragment the client is viewing at connect time.
    #[serde(default)]
    pub storyfragment: Option<String>,
}

/// GET /auth/sse — subscribe to pane updates. The stream carries
/// `paneUpdate` and `heartbeat` events; no request deadline applies.
pub async fn handle_sse(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Query(query): Query<SseQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let tenant = ctx.tenant(&headers)?;
    let session_id = ctx
        .session_id(&headers, query.session.as_deref())
        .ok_or_else(|| TractError::SessionUnknown("missing session id".to_string()))?
        .to_string();

    if ctx
        .cache
        .user_state
        .get_session(&tenant.tenant_id, &session_id)
        .is_none()
    {
        return Err(TractError::SessionUnknown(session_id).into());
    }

    let stream = Arc::clone(&ctx.broadcaster).subscribe(
        &tenant.tenant_id,
        &session_id,
        query.storyfragment.as_deref(),
    );
    Ok(Sse::new(stream))
}
