//! Runtime configuration — CLI flags layered over environment variables
//!
//! Every knob has an environment default so the gateway can be configured
//! entirely from its deployment environment; flags exist for local
//! overrides. `Settings::resolve` folds both into one immutable struct
//! that `main` builds the components from.

use clap::{Parser, ValueEnum};
use url::Url;

use crate::error::{GatewayError, Result};

/// beacon-gateway — service-discovery reverse proxy
#[derive(Debug, Parser)]
#[command(name = "beacon-gateway", version, about)]
pub struct Cli {
    /// The registry (management) port
    #[arg(long = "registryport")]
    pub registry_port: Option<u16>,

    /// The proxy (forwarding) port
    #[arg(long = "proxyport")]
    pub proxy_port: Option<u16>,

    /// The status port
    #[arg(long = "statusport")]
    pub status_port: Option<u16>,

    /// The type of cache backing the registry
    #[arg(long = "cache", value_enum)]
    pub cache: Option<CacheKind>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Which cache implementation backs the registration store
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheKind {
    /// In-process map with per-keyspace locks
    Memory,
    /// External Redis instance (`REDIS_ADDR`)
    Redis,
}

/// Resolved runtime settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub registry_port: u16,
    pub proxy_port: u16,
    pub status_port: u16,
    pub cache: CacheKind,
    /// Redis address, kept only when the redis cache is selected
    pub redis_addr: Option<String>,

    /// Registration TTL in seconds; the store grants +2s of grace
    pub discovery_expiration: u64,
    /// Seconds between health-collector loops
    pub status_time: u64,
    /// Per-probe HTTP timeout in seconds
    pub status_timeout: u64,
    /// Prefix for the static-server fallback; empty disables it
    pub static_path: String,
    /// Service names the status surface expects to see registered
    pub expected_services: Vec<String>,

    /// Cookie carrying the SSO JWT; `None` falls back to `iam-sso-test`
    pub sso_cookie: Option<String>,
    /// HMAC secret the SSO JWTs are signed with
    pub token_signing_key: Option<String>,

    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,

    /// Build/deploy identity, emitted in the gateway's own status item
    pub revision: String,
    pub deploytag: String,
    pub deploytype: String,
    pub configversion: String,
}

/// Read an environment variable, falling back to a default when unset or empty.
pub fn env_with_default(name: &str, def: &str) -> String {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => v,
        _ => def.to_string(),
    }
}

fn env_port(name: &str, def: u16) -> Result<u16> {
    let s = env_with_default(name, &def.to_string());
    s.parse()
        .map_err(|_| GatewayError::Config(format!("{} must be a port number, got '{}'", name, s)))
}

fn env_secs(name: &str, def: u64) -> Result<u64> {
    let s = env_with_default(name, &def.to_string());
    s.parse()
        .map_err(|_| GatewayError::Config(format!("{} must be a number of seconds, got '{}'", name, s)))
}

/// Split a comma-separated env override into a list, or use the default.
fn env_list(name: &str, def: &[&str]) -> Vec<String> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => v.split(',').map(|s| s.trim().to_string()).collect(),
        _ => def.iter().map(|s| s.to_string()).collect(),
    }
}

impl Settings {
    /// Fold CLI flags and environment into the final settings.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let redis_addr = std::env::var("REDIS_ADDR").ok().filter(|s| !s.is_empty());

        // Explicit flag wins; otherwise a parseable REDIS_ADDR selects redis.
        let cache = match cli.cache {
            Some(kind) => kind,
            None => match &redis_addr {
                Some(addr) if Url::parse(addr).is_ok() => CacheKind::Redis,
                _ => CacheKind::Memory,
            },
        };
        if cache == CacheKind::Redis && redis_addr.is_none() {
            return Err(GatewayError::Config(
                "cache type 'redis' requires REDIS_ADDR".to_string(),
            ));
        }

        let expected_services = env_with_default("EXPECTED_SERVICES", "")
            .split(' ')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();

        Ok(Self {
            registry_port: match cli.registry_port {
                Some(p) => p,
                None => env_port("VASCO_REGISTRY", 8081)?,
            },
            proxy_port: match cli.proxy_port {
                Some(p) => p,
                None => env_port("VASCO_PROXY", 8080)?,
            },
            status_port: match cli.status_port {
                Some(p) => p,
                None => env_port("VASCO_STATUS", 8082)?,
            },
            cache,
            redis_addr,
            discovery_expiration: env_secs("DISCOVERY_EXPIRATION", 3600)?,
            status_time: env_secs("STATUS_TIME", 60)?,
            status_timeout: env_secs("STATUS_TIMEOUT", 10)?,
            static_path: env_with_default("STATIC_PATH", ""),
            expected_services,
            sso_cookie: std::env::var("IAM_SSO_COOKIE").ok().filter(|s| !s.is_empty()),
            token_signing_key: std::env::var("IAM_TOKEN_SIGNING_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            allowed_origins: env_list("CORS_ALLOWED_ORIGINS", &["*"]),
            allowed_methods: env_list(
                "CORS_ALLOWED_METHODS",
                &["POST", "GET", "DELETE", "PUT", "OPTIONS"],
            ),
            allowed_headers: env_list(
                "CORS_ALLOWED_HEADERS",
                &[
                    "Content-Type",
                    "Authorization",
                    "Accept",
                    "Origin",
                    "X-Requested-With",
                    "X-USER-ARN",
                ],
            ),
            revision: env_with_default("REVISION", ""),
            deploytag: env_with_default("DEPLOYTAG", ""),
            deploytype: env_with_default("DEPLOYTYPE", ""),
            configversion: env_with_default("CONFIGVERSION", ""),
        })
    }

    /// Preload key/value pairs from the `DISCOVERY_CONFIG` environment
    /// variable (a JSON string→string map) into the cache.
    pub fn preload_map() -> Result<Vec<(String, String)>> {
        let raw = env_with_default("DISCOVERY_CONFIG", "");
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        let map: std::collections::HashMap<String, String> = serde_json::from_str(&raw)?;
        Ok(map.into_iter().collect())
    }
}
