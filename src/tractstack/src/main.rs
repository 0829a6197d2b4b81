//! TractStack engine: belief-driven reactive rendering backend.
//!
//! Main entry point that initializes all subsystems and starts the server.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tractstack_api::{ApiServer, AppContext};
use tractstack_broadcast::Broadcaster;
use tractstack_cache::TenantCache;
use tractstack_core::AppConfig;
use tractstack_events::EventProcessor;
use tractstack_store::{BeliefStateStore, ContentLoader, FingerprintLocks, PersistQueue};
use tractstack_tenant::TenantRegistry;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "tractstack")]
#[command(about = "Multi-tenant belief-driven reactive rendering engine")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "TRACTSTACK__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "TRACTSTACK__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Development mode: localhost exempt from domain checks
    #[arg(long, default_value_t = false)]
    dev: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tractstack=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("TractStack engine starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if cli.dev {
        config.development = true;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        default_tenant = %config.tenants.default_tenant,
        development = config.development,
        "Configuration loaded"
    );

    // Assemble the component graph; everything downstream receives its
    // collaborators from here.
    let cache = Arc::new(TenantCache::new(&config.cache));
    let persist = PersistQueue::new(&config.persist);
    let locks = Arc::new(FingerprintLocks::new());
    let loader = ContentLoader::new(Arc::clone(&cache));
    let beliefs = Arc::new(BeliefStateStore::new(
        Arc::clone(&cache),
        persist.clone(),
        Arc::clone(&locks),
    ));
    let broadcaster = Arc::new(Broadcaster::new(
        config.sse.clone(),
        Arc::clone(&cache),
        loader.clone(),
        Arc::clone(&beliefs),
    ));
    let processor = Arc::new(EventProcessor::new(
        Arc::clone(&cache),
        loader.clone(),
        Arc::clone(&beliefs),
        Arc::clone(&broadcaster),
        persist.clone(),
    ));
    let tenants = Arc::new(TenantRegistry::new(&config.tenants, config.development));

    let context = Arc::new(AppContext {
        config: config.clone(),
        tenants,
        cache: Arc::clone(&cache),
        loader,
        beliefs,
        broadcaster,
        processor,
        persist,
        start_time: Instant::now(),
    });

    // Periodic cache maintenance: TTL sweeps plus analytics retention.
    let sweep_cache = Arc::clone(&cache);
    let sweep_interval = config.cache.sweep_interval_secs;
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(sweep_interval));
        loop {
            interval.tick().await;
            sweep_cache.maintenance();
            sweep_cache
                .analytics
                .prune_before(chrono::Utc::now() - chrono::Duration::days(7));
        }
    });

    let server = ApiServer::new(context);
    server.start_metrics().await?;
    server.start_http().await?;

    Ok(())
}
