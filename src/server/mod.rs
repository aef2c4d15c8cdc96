//! HTTP surfaces — the proxy, registry, and status listeners
//!
//! Each surface binds its own port and serves connections with hyper's
//! http1 stack, one task per connection. All shared components are owned
//! by `AppState`, constructed once in `main` and handed to every handler
//! by reference counting.

mod proxy;
mod registry_api;
mod status_api;

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::auth::Iam;
use crate::cache::Cache;
use crate::config::Settings;
use crate::error::{GatewayError, Result};
use crate::health::{GatewayIdentity, HealthCollector, LoopTimer, StatusHandle};
use crate::proxy_client::ProxyClient;
use crate::registry::{PathRouter, Registry};

/// Registry mutations and status reads pull the next health loop forward
/// this far, so the snapshot catches up with interest without hammering
/// backends during startup bursts.
const REFRESH_SOON: Duration = Duration::from_secs(5);

/// Health collector tick granularity.
const STATUS_TICK: Duration = Duration::from_millis(250);

/// Delay before the first health loop after startup.
const FIRST_LOOP_DELAY: Duration = Duration::from_secs(15);

/// Components shared by every request handler
pub struct AppState {
    pub settings: Settings,
    pub cache: Arc<dyn Cache>,
    pub registry: Arc<Registry>,
    pub router: Arc<PathRouter>,
    pub status: Arc<StatusHandle>,
    pub timer: Arc<LoopTimer>,
    pub iam: Arc<Iam>,
    pub client: Arc<ProxyClient>,
}

impl AppState {
    /// Ask the health collector to run again soon.
    pub fn refresh_status_soon(&self) {
        self.timer.at_most(REFRESH_SOON);
    }
}

/// Which handler a listener dispatches to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Proxy,
    Registry,
    Status,
}

/// Build the shared state and start everything: the health collector and
/// the three listeners. Returns the state (so callers can reach the timer
/// and status snapshot) and the listener task handles.
pub async fn spawn_gateway(
    settings: Settings,
    iam: Iam,
    cache: Arc<dyn Cache>,
) -> Result<(Arc<AppState>, Vec<tokio::task::JoinHandle<()>>)> {
    let registry = Arc::new(Registry::new(cache.clone(), settings.discovery_expiration));
    let router = Arc::new(PathRouter::new(
        registry.clone(),
        settings.static_path.clone(),
    ));
    let status = Arc::new(StatusHandle::new());
    let status_time = if settings.status_time == 0 {
        60
    } else {
        settings.status_time
    };
    let timer = Arc::new(LoopTimer::new(STATUS_TICK, Duration::from_secs(status_time)));

    let collector = Arc::new(HealthCollector::new(
        registry.clone(),
        status.clone(),
        timer.clone(),
        Duration::from_secs(settings.status_timeout.max(1)),
        settings.expected_services.clone(),
        GatewayIdentity {
            name: "beacon".to_string(),
            port: settings.registry_port.to_string(),
            revision: settings.revision.clone(),
            deploytag: settings.deploytag.clone(),
            deploytype: settings.deploytype.clone(),
            configversion: settings.configversion.clone(),
        },
    ));

    let state = Arc::new(AppState {
        settings,
        cache,
        registry,
        router,
        status,
        timer,
        iam: Arc::new(iam),
        client: Arc::new(ProxyClient::new()),
    });

    // wait a little, then start watching status
    state.timer.at_most(FIRST_LOOP_DELAY);
    tokio::spawn(collector.run());

    let handles = vec![
        spawn_surface(Surface::Proxy, state.settings.proxy_port, state.clone()).await?,
        spawn_surface(Surface::Registry, state.settings.registry_port, state.clone()).await?,
        spawn_surface(Surface::Status, state.settings.status_port, state.clone()).await?,
    ];
    Ok((state, handles))
}

/// Bind one surface and serve it forever.
pub async fn spawn_surface(
    surface: Surface,
    port: u16,
    state: Arc<AppState>,
) -> Result<tokio::task::JoinHandle<()>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::Config(format!("failed to bind {}: {}", addr, e)))?;

    tracing::info!(surface = ?surface, address = %addr, "listening");

    let handle = tokio::spawn(async move {
        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            let state = state.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let state = state.clone();
                    async move {
                        let resp = match surface {
                            Surface::Proxy => proxy::handle(req, state).await,
                            Surface::Registry => registry_api::handle(req, remote_addr, state).await,
                            Surface::Status => status_api::handle(req, state).await,
                        };
                        Ok::<_, std::convert::Infallible>(resp)
                    }
                });
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::debug!(error = %e, "connection ended with error");
                }
            });
        }
    });

    Ok(handle)
}

/// Plain-text response with the given status.
pub(crate) fn text_response(status: u16, body: impl Into<Bytes>) -> hyper::Response<Full<Bytes>> {
    hyper::Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .body(Full::new(body.into()))
        .unwrap()
}

/// JSON response with the given status.
pub(crate) fn json_response<T: Serialize>(status: u16, value: &T) -> hyper::Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => hyper::Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .unwrap(),
        Err(e) => text_response(500, format!("serialization failure: {}", e)),
    }
}

/// Add the configured CORS headers to a response.
pub(crate) fn apply_cors(headers: &mut http::HeaderMap, settings: &Settings) {
    let pairs = [
        ("Access-Control-Allow-Origin", settings.allowed_origins.join(",")),
        ("Access-Control-Allow-Methods", settings.allowed_methods.join(",")),
        ("Access-Control-Allow-Headers", settings.allowed_headers.join(",")),
    ];
    for (name, value) in pairs {
        if let Ok(v) = http::HeaderValue::from_str(&value) {
            headers.insert(name, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> Settings {
        let cli = crate::config::Cli {
            registry_port: Some(0),
            proxy_port: Some(0),
            status_port: Some(0),
            cache: None,
            log_level: "info".into(),
        };
        Settings::resolve(&cli).unwrap()
    }

    #[test]
    fn test_text_response() {
        let resp = text_response(404, "nope");
        assert_eq!(resp.status(), 404);
        assert_eq!(resp.headers()["Content-Type"], "text/plain");
    }

    #[test]
    fn test_json_response() {
        let resp = json_response(200, &"abc123");
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["Content-Type"], "application/json");
    }

    #[test]
    fn test_apply_cors_joins_lists() {
        let settings = test_settings();
        let mut headers = http::HeaderMap::new();
        apply_cors(&mut headers, &settings);
        assert_eq!(headers["Access-Control-Allow-Origin"], "*");
        assert_eq!(
            headers["Access-Control-Allow-Methods"],
            "POST,GET,DELETE,PUT,OPTIONS"
        );
        assert!(headers["Access-Control-Allow-Headers"]
            .to_str()
            .unwrap()
            .contains(","));
    }
}
