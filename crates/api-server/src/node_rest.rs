//! Content-node read endpoints and operational probes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::context::AppContext;
use crate::error::ApiError;

/// GET /nodes/panes/:id — JSON snapshot of one pane.
pub async fn handle_pane(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let tenant = ctx.tenant(&headers)?;
    let db = tenant.db().await?;
    let pane = ctx.loader.pane(&db, &id).await?;
    Ok(Json(serde_json::to_value(pane).map_err(tractstack_core::TractError::from)?))
}

pub async fn handle_storyfragment(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let tenant = ctx.tenant(&headers)?;
    let db = tenant.db().await?;
    let fragment = ctx.loader.storyfragment(&db, &id).await?;
    Ok(Json(serde_json::to_value(fragment).map_err(tractstack_core::TractError::from)?))
}

pub async fn handle_tractstack(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let tenant = ctx.tenant(&headers)?;
    let db = tenant.db().await?;
    let ts = ctx.loader.tractstack(&db, &id).await?;
    Ok(Json(serde_json::to_value(ts).map_err(tractstack_core::TractError::from)?))
}

pub async fn handle_menu(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let tenant = ctx.tenant(&headers)?;
    let db = tenant.db().await?;
    let menu = ctx.loader.menu(&db, &id).await?;
    Ok(Json(serde_json::to_value(menu).map_err(tractstack_core::TractError::from)?))
}

pub async fn handle_resource(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let tenant = ctx.tenant(&headers)?;
    let db = tenant.db().await?;
    let resource = ctx.loader.resource(&db, &id).await?;
    Ok(Json(serde_json::to_value(resource).map_err(tractstack_core::TractError::from)?))
}

pub async fn handle_belief(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let tenant = ctx.tenant(&headers)?;
    let db = tenant.db().await?;
    let belief = ctx.loader.belief(&db, &id).await?;
    Ok(Json(serde_json::to_value(belief).map_err(tractstack_core::TractError::from)?))
}

pub async fn handle_file(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let tenant = ctx.tenant(&headers)?;
    let db = tenant.db().await?;
    let file = ctx.loader.file(&db, &id).await?;
    Ok(Json(serde_json::to_value(file).map_err(tractstack_core::TractError::from)?))
}

// ─── Operational probes ─────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub node_id: String,
    pub uptime_secs: u64,
    pub sse_subscribers: usize,
}

/// GET /health
pub async fn health_check(State(ctx): State<Arc<AppContext>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        node_id: ctx.config.node_id.clone(),
        uptime_secs: ctx.start_time.elapsed().as_secs(),
        sse_subscribers: ctx.broadcaster.subscriber_count(),
    })
}

/// GET /ready
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
