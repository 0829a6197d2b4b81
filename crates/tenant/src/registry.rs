//! Tenant registry: resolves a request to its tenant and owns the tenant
//! table. Resolution order is the `X-TractStack-Tenant` header, then the
//! domain table indexed by `Host`/`Origin`, then the configured default.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tractstack_core::config::TenantConfig;
use tractstack_core::{TractError, TractResult};
use tracing::{info, warn};
use url::Url;

use crate::context::TenantContext;

/// Request identity material the HTTP layer extracts for resolution.
#[derive(Debug, Default, Clone)]
pub struct RequestOrigin<'a> {
    pub tenant_header: Option<&'a str>,
    pub host: Option<&'a str>,
    pub origin: Option<&'a str>,
}

pub struct TenantRegistry {
    tenants: RwLock<HashMap<String, Arc<TenantContext>>>,
    /// domain -> tenant id.
    domains: RwLock<HashMap<String, String>>,
    default_tenant: String,
    db_dir: PathBuf,
    /// Development mode exempts localhost from the domain allow-list.
    development: bool,
}

impl TenantRegistry {
    pub fn new(config: &TenantConfig, development: bool) -> Self {
        let registry = Self {
            tenants: RwLock::new(HashMap::new()),
            domains: RwLock::new(HashMap::new()),
            default_tenant: config.default_tenant.clone(),
            db_dir: PathBuf::from(&config.db_dir),
            development,
        };
        registry.register(
            &config.default_tenant,
            config.allowed_domains.clone(),
            PathBuf::from(&config.media_path),
        );
        registry
    }

    /// Add a tenant to the table. Tenant objects are immutable after load;
    /// re-registering replaces the entry wholesale.
    pub fn register(
        &self,
        tenant_id: &str,
        allowed_domains: Vec<String>,
        media_path: PathBuf,
    ) -> Arc<TenantContext> {
        let db_path = self.db_dir.join(format!("{tenant_id}.db"));
        let context = Arc::new(TenantContext::new(
            tenant_id,
            allowed_domains.clone(),
            db_path,
            media_path,
        ));

        self.tenants
            .write()
            .insert(tenant_id.to_string(), Arc::clone(&context));
        let mut domains = self.domains.write();
        for domain in allowed_domains {
            domains.insert(domain, tenant_id.to_string());
        }

        info!(tenant = tenant_id, "tenant registered");
        context
    }

    /// Resolve a request to its tenant and enforce the domain allow-list.
    pub fn resolve(&self, request: &RequestOrigin<'_>) -> TractResult<Arc<TenantContext>> {
        let tenant_id = self.identify(request)?;

        let context = self
            .tenants
            .read()
            .get(&tenant_id)
            .cloned()
            .ok_or_else(|| TractError::TenantUnknown(tenant_id.clone()))?;

        if let Some(origin_host) = request.origin.and_then(origin_host) {
            let exempt = self.development && is_localhost(&origin_host);
            if !exempt && !context.domain_allowed(&origin_host) {
                warn!(tenant = %tenant_id, origin = %origin_host, "origin rejected");
                return Err(TractError::DomainForbidden(origin_host));
            }
        }

        Ok(context)
    }

    fn identify(&self, request: &RequestOrigin<'_>) -> TractResult<String> {
        if let Some(header) = request.tenant_header {
            if self.tenants.read().contains_key(header) {
                return Ok(header.to_string());
            }
            return Err(TractError::TenantUnknown(header.to_string()));
        }

        let domains = self.domains.read();
        for candidate in [
            request.host.map(strip_port),
            request.origin.and_then(origin_host),
        ]
        .into_iter()
        .flatten()
        {
            if let Some(tenant_id) = domains.get(candidate.as_str()) {
                return Ok(tenant_id.clone());
            }
        }

        Ok(self.default_tenant.clone())
    }

    pub fn get(&self, tenant_id: &str) -> Option<Arc<TenantContext>> {
        self.tenants.read().get(tenant_id).cloned()
    }

    /// Remove a tenant, closing its database handle.
    pub async fn evict(&self, tenant_id: &str) {
        let context = self.tenants.write().remove(tenant_id);
        self.domains.write().retain(|_, id| id != tenant_id);
        if let Some(context) = context {
            context.close().await;
            info!(tenant = tenant_id, "tenant evicted");
        }
    }
}

fn strip_port(host: &str) -> String {
    host.rsplit_once(':')
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| host.to_string())
}

fn origin_host(origin: &str) -> Option<String> {
    Url::parse(origin)
        .ok()
        .and_then(|url| url.host_str().map(|h| h.to_string()))
}

fn is_localhost(host: &str) -> bool {
    host == "localhost" || host == "127.0.0.1" || host == "::1"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(development: bool) -> TenantRegistry {
        let config = TenantConfig {
            default_tenant: "default".to_string(),
            db_dir: "./data".to_string(),
            allowed_domains: vec!["example.com".to_string()],
            media_path: "./media".to_string(),
        };
        TenantRegistry::new(&config, development)
    }

    #[test]
    fn test_header_resolution_wins() {
        let registry = registry(false);
        registry.register("acme", vec!["acme.io".to_string()], PathBuf::from("./media"));

        let resolved = registry
            .resolve(&RequestOrigin {
                tenant_header: Some("acme"),
                host: Some("example.com"),
                origin: None,
            })
            .expect("resolve");
        assert_eq!(resolved.tenant_id, "acme");
    }

    #[test]
    fn test_unknown_header_fails() {
        let registry = registry(false);
        let err = registry
            .resolve(&RequestOrigin {
                tenant_header: Some("ghost"),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, TractError::TenantUnknown(_)));
    }

    #[test]
    fn test_domain_table_resolution() {
        let registry = registry(false);
        registry.register("acme", vec!["acme.io".to_string()], PathBuf::from("./media"));

        let resolved = registry
            .resolve(&RequestOrigin {
                tenant_header: None,
                host: Some("acme.io:8080"),
                origin: None,
            })
            .expect("resolve");
        assert_eq!(resolved.tenant_id, "acme");
    }

    #[test]
    fn test_falls_back_to_default_tenant() {
        let registry = registry(false);
        let resolved = registry
            .resolve(&RequestOrigin::default())
            .expect("resolve");
        assert_eq!(resolved.tenant_id, "default");
    }

    #[test]
    fn test_origin_allow_list_enforced() {
        let registry = registry(false);
        let err = registry
            .resolve(&RequestOrigin {
                tenant_header: None,
                host: None,
                origin: Some("https://evil.example.net"),
            })
            .unwrap_err();
        assert!(matches!(err, TractError::DomainForbidden(_)));

        assert!(registry
            .resolve(&RequestOrigin {
                tenant_header: None,
                host: None,
                origin: Some("https://example.com/page"),
            })
            .is_ok());
    }

    #[test]
    fn test_localhost_exempt_in_development() {
        let err = registry(false)
            .resolve(&RequestOrigin {
                origin: Some("http://localhost:4321"),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, TractError::DomainForbidden(_)));

        assert!(registry(true)
            .resolve(&RequestOrigin {
                origin: Some("http://localhost:4321"),
                ..Default::default()
            })
            .is_ok());
    }
}
