//! HTTP server assembly: route groups, middleware layers, and the
//! Prometheus exporter on its own port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth_rest;
use crate::context::AppContext;
use crate::fragment_rest;
use crate::node_rest;

pub struct ApiServer {
    context: Arc<AppContext>,
}

impl ApiServer {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Start the HTTP server. Every route except the SSE stream carries
    /// the configured request deadline.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let ctx = Arc::clone(&self.context);
        let deadline = Duration::from_millis(ctx.config.api.request_timeout_ms);

        let auth_routes = Router::new()
            .route("/auth/visit", post(auth_rest::handle_visit))
            .route("/auth/state", post(auth_rest::handle_state))
            .layer(TimeoutLayer::new(deadline))
            .with_state(Arc::clone(&ctx));

        // SSE streams live until the client disconnects; no deadline.
        let sse_routes = Router::new()
            .route("/auth/sse", get(auth_rest::handle_sse))
            .with_state(Arc::clone(&ctx));

        let fragment_routes = Router::new()
            .route("/fragments/panes/:id", get(fragment_rest::handle_pane_fragment))
            .layer(TimeoutLayer::new(deadline))
            .with_state(Arc::clone(&ctx));

        let node_routes = Router::new()
            .route("/nodes/panes/:id", get(node_rest::handle_pane))
            .route("/nodes/storyfragments/:id", get(node_rest::handle_storyfragment))
            .route("/nodes/tractstacks/:id", get(node_rest::handle_tractstack))
            .route("/nodes/menus/:id", get(node_rest::handle_menu))
            .route("/nodes/resources/:id", get(node_rest::handle_resource))
            .route("/nodes/beliefs/:id", get(node_rest::handle_belief))
            .route("/nodes/files/:id", get(node_rest::handle_file))
            .layer(TimeoutLayer::new(deadline))
            .with_state(Arc::clone(&ctx));

        let ops_routes = Router::new()
            .route("/health", get(node_rest::health_check))
            .route("/ready", get(node_rest::readiness))
            .route("/live", get(node_rest::liveness))
            .with_state(Arc::clone(&ctx));

        let app = Router::new()
            .merge(auth_routes)
            .merge(sse_routes)
            .merge(fragment_routes)
            .merge(node_routes)
            .merge(ops_routes)
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http());

        let addr = SocketAddr::new(
            ctx.config.api.host.parse()?,
            ctx.config.api.http_port,
        );
        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Start the metrics exporter on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        let handle = builder
            .with_http_listener(SocketAddr::new(
                self.context.config.api.host.parse()?,
                self.context.config.metrics.port,
            ))
            .install_recorder()?;

        info!(port = self.context.config.metrics.port, "Metrics exporter started");

        // Keep the handle alive
        std::mem::forget(handle);
        Ok(())
    }
}
