use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use beacon_gateway::auth::{AccessController, Iam};
use beacon_gateway::cache::{Cache, MemoryCache, RedisCache};
use beacon_gateway::config::{CacheKind, Cli, Settings};

/// The access-controller rule list, read from the working directory.
const ACL_FILE: &str = "acl.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    tracing::info!("beacon-gateway v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::resolve(&cli)?;

    let cache: Arc<dyn Cache> = match settings.cache {
        CacheKind::Memory => Arc::new(MemoryCache::new()),
        CacheKind::Redis => {
            let addr = settings
                .redis_addr
                .clone()
                .ok_or_else(|| anyhow::anyhow!("redis cache selected but REDIS_ADDR is unset"))?;
            let redis = RedisCache::new(&addr)?;
            redis.ping().await?;
            tracing::info!(addr = %addr, "registry backed by redis");
            Arc::new(redis)
        }
    };

    // Deployment-provided key/value pairs land in the cache before anything
    // reads from it.
    for (key, value) in Settings::preload_map()? {
        tracing::info!(key = %key, value = %value, "cache preload");
        cache.set(&key, &value).await?;
    }

    let access = AccessController::from_file(ACL_FILE)?;
    tracing::info!(rules = access.rule_count(), "access controller loaded");
    let iam = Iam::new(
        access,
        settings.sso_cookie.clone(),
        settings.token_signing_key.clone(),
    );

    tracing::info!(
        proxy = settings.proxy_port,
        registry = settings.registry_port,
        status = settings.status_port,
        "starting listeners"
    );
    let (_state, handles) = beacon_gateway::server::spawn_gateway(settings, iam, cache).await?;

    // Listener tasks run forever; if one ends, the process is done for.
    for handle in handles {
        handle.await?;
    }
    Ok(())
}
