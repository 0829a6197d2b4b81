//! Shared application context threaded through every handler. Components
//! receive their collaborators from here instead of process-wide globals,
//! so tests can assemble the same graph from fakes.

use std::sync::Arc;
use std::time::Instant;

use axum::http::{header, HeaderMap};
use tractstack_broadcast::Broadcaster;
use tractstack_cache::TenantCache;
use tractstack_core::{AppConfig, TractResult};
use tractstack_events::EventProcessor;
use tractstack_store::{BeliefStateStore, ContentLoader, PersistQueue};
use tractstack_tenant::registry::RequestOrigin;
use tractstack_tenant::{TenantContext, TenantRegistry};

pub const TENANT_HEADER: &str = "x-tractstack-tenant";
pub const SESSION_HEADER: &str = "x-tractstack-session-id";

pub struct AppContext {
    pub config: AppConfig,
    pub tenants: Arc<TenantRegistry>,
    pub cache: Arc<TenantCache>,
    pub loader: ContentLoader,
    pub beliefs: Arc<BeliefStateStore>,
    pub broadcaster: Arc<Broadcaster>,
    pub processor: Arc<EventProcessor>,
    pub persist: PersistQueue,
    pub start_time: Instant,
}

impl AppContext {
    /// Resolve the request's tenant from headers, enforcing the domain
    /// allow-list.
    pub fn tenant(&self, headers: &HeaderMap) -> TractResult<Arc<TenantContext>> {
        let request = RequestOrigin {
            tenant_header: header_str(headers, TENANT_HEADER),
            host: headers
                .get(header::HOST)
                .and_then(|value| value.to_str().ok()),
            origin: headers
                .get(header::ORIGIN)
                .and_then(|value| value.to_str().ok()),
        };
        self.tenants.resolve(&request)
    }

    /// The session id, from the dedicated header or a `?session=` query
    /// value the caller extracted.
    pub fn session_id<'a>(&self, headers: &'a HeaderMap, query: Option<&'a str>) -> Option<&'a str> {
        header_str(headers, SESSION_HEADER).or(query)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
