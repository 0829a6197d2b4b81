use serde::Deserialize;

/// Root application configuration. Loaded from environment variables with
/// the prefix `TRACTSTACK__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub development: bool,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sse: SseConfig,
    #[serde(default)]
    pub persist: PersistConfig,
    #[serde(default)]
    pub tenants: TenantConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Per-request deadline for handler I/O.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Content layer TTL; 0 means unbounded.
    #[serde(default = "default_content_ttl_secs")]
    pub content_ttl_secs: u64,
    #[serde(default = "default_user_state_ttl_secs")]
    pub user_state_ttl_secs: u64,
    #[serde(default = "default_fragment_ttl_secs")]
    pub fragment_ttl_secs: u64,
    #[serde(default = "default_fragment_cap_bytes")]
    pub fragment_cap_bytes: usize,
    #[serde(default = "default_content_cap_bytes")]
    pub content_cap_bytes: usize,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SseConfig {
    /// Bounded per-subscriber outbound queue before coalescing kicks in.
    #[serde(default = "default_queue_cap")]
    pub queue_cap: usize,
    /// Hard cap beyond which a lagging subscriber is dropped.
    #[serde(default = "default_queue_hard_cap")]
    pub queue_hard_cap: usize,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_idle_close_secs")]
    pub idle_close_secs: u64,
    /// Session grace period after the stream closes.
    #[serde(default = "default_session_grace_secs")]
    pub session_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistConfig {
    /// Bounded backlog of durable writes; overflow drops with a warning.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenantConfig {
    #[serde(default = "default_tenant_id")]
    pub default_tenant: String,
    /// Directory holding one SQLite database per tenant.
    #[serde(default = "default_db_dir")]
    pub db_dir: String,
    /// Domains allowed for the default tenant.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default = "default_media_path")]
    pub media_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_content_ttl_secs() -> u64 {
    3600
}
fn default_user_state_ttl_secs() -> u64 {
    1800
}
fn default_fragment_ttl_secs() -> u64 {
    600
}
fn default_fragment_cap_bytes() -> usize {
    64 * 1024 * 1024
}
fn default_content_cap_bytes() -> usize {
    256 * 1024 * 1024
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_queue_cap() -> usize {
    32
}
fn default_queue_hard_cap() -> usize {
    128
}
fn default_heartbeat_secs() -> u64 {
    15
}
fn default_idle_close_secs() -> u64 {
    30
}
fn default_session_grace_secs() -> u64 {
    60
}
fn default_queue_depth() -> usize {
    100_000
}
fn default_tenant_id() -> String {
    "default".to_string()
}
fn default_db_dir() -> String {
    "./data".to_string()
}
fn default_media_path() -> String {
    "./media".to_string()
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            content_ttl_secs: default_content_ttl_secs(),
            user_state_ttl_secs: default_user_state_ttl_secs(),
            fragment_ttl_secs: default_fragment_ttl_secs(),
            fragment_cap_bytes: default_fragment_cap_bytes(),
            content_cap_bytes: default_content_cap_bytes(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            queue_cap: default_queue_cap(),
            queue_hard_cap: default_queue_hard_cap(),
            heartbeat_secs: default_heartbeat_secs(),
            idle_close_secs: default_idle_close_secs(),
            session_grace_secs: default_session_grace_secs(),
        }
    }
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
        }
    }
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            default_tenant: default_tenant_id(),
            db_dir: default_db_dir(),
            allowed_domains: Vec::new(),
            media_path: default_media_path(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            development: false,
            api: ApiConfig::default(),
            cache: CacheConfig::default(),
            sse: SseConfig::default(),
            persist: PersistConfig::default(),
            tenants: TenantConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("TRACTSTACK")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
