//! Registry management surface
//!
//! Backends drive their own lifecycle here: register, refresh, and
//! unregister. `/register/test` exercises the router without proxying, and
//! the `/config` key/value store lets deployments stash small shared
//! values in the same cache the registry uses. The status surface is also
//! mounted on this port.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;

use super::{json_response, status_api, text_response, AppState};
use crate::registry::Registration;

pub(crate) async fn handle(
    req: Request<Incoming>,
    remote_addr: SocketAddr,
    state: Arc<AppState>,
) -> Response<Full<Bytes>> {
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();

    // the status surface is mounted on the registry port as well
    if path == "/status" || path.starts_with("/status/") {
        return status_api::respond(&method, &path, &state).await;
    }

    match (method.as_str(), path.as_str()) {
        ("POST", "/register") => register(req, state).await,
        ("GET", "/register/test") => test_registration(req, state).await,
        ("GET", "/register/whoami") => json_response(200, &remote_addr.to_string()),
        (method, path) => {
            if let Some(hash) = path.strip_prefix("/register/") {
                return match method {
                    "PUT" => refresh(hash, state).await,
                    "DELETE" => unregister(hash, state).await,
                    _ => text_response(404, "not found"),
                };
            }
            if let Some(rest) = path.strip_prefix("/config/") {
                return config(method, rest, state).await;
            }
            text_response(404, "not found")
        }
    }
}

/// POST /register — store a registration and return its hash.
async fn register(req: Request<Incoming>, state: Arc<AppState>) -> Response<Full<Bytes>> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return text_response(400, format!("could not read registration: {}", e)),
    };

    let mut reg: Registration = match serde_json::from_slice(&body) {
        Ok(reg) => reg,
        Err(e) => {
            tracing::warn!(error = %e, "could not decode registration request");
            return text_response(400, format!("could not decode registration: {}", e));
        }
    };
    if let Err(e) = reg.set_defaults() {
        tracing::warn!(error = %e, "registration failed validation");
        return text_response(400, e.to_string());
    }

    match state.registry.register(&reg, true).await {
        Ok(hash) => {
            // a new backend appeared, get fresh status soon
            state.refresh_status_soon();
            json_response(200, &hash)
        }
        Err(e) => {
            tracing::error!(error = %e, "could not store registration");
            text_response(500, e.to_string())
        }
    }
}

/// PUT /register/{hash} — "I'm still here".
async fn refresh(hash: &str, state: Arc<AppState>) -> Response<Full<Bytes>> {
    let reg = match state.registry.find(hash).await {
        Ok(reg) => reg,
        Err(_) => {
            tracing::warn!(hash, "refresh for unknown hash");
            return text_response(404, "No registration found for that hash.");
        }
    };
    if let Err(e) = state.registry.refresh(&reg).await {
        tracing::error!(error = %e, hash, "could not refresh registration");
        return text_response(500, e.to_string());
    }
    state.refresh_status_soon();
    tracing::info!(name = %reg.name, address = %reg.address, "refreshed");
    text_response(200, "")
}

/// DELETE /register/{hash} — idempotent removal.
async fn unregister(hash: &str, state: Arc<AppState>) -> Response<Full<Bytes>> {
    if let Ok(reg) = state.registry.find(hash).await {
        if let Err(e) = state.registry.unregister(&reg).await {
            tracing::error!(error = %e, hash, "could not unregister");
            return text_response(500, e.to_string());
        }
    }
    tracing::info!(hash, "unregistered");
    state.refresh_status_soon();
    text_response(200, "")
}

/// GET /register/test?url=… — where would the router send this URL?
async fn test_registration(req: Request<Incoming>, state: Arc<AppState>) -> Response<Full<Bytes>> {
    let url = req
        .uri()
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()))
        .and_then(|mut pairs| pairs.find(|(k, _)| k == "url"))
        .map(|(_, v)| v.to_string())
        .unwrap_or_default();

    if url.is_empty() {
        return text_response(404, "url query parameter required");
    }

    match state.router.find_best_match(&url).await {
        Ok(reg) => json_response(200, &reg),
        Err(e) => text_response(404, e.to_string()),
    }
}

/// The /config key/value surface.
async fn config(method: &str, rest: &str, state: Arc<AppState>) -> Response<Full<Bytes>> {
    match (method, rest) {
        ("GET", "status") => text_response(200, ""),
        ("PUT", keyvalue) => {
            let Some((key, value)) = keyvalue.split_once('/') else {
                return text_response(404, "expected /config/{key}/{value}");
            };
            match state.cache.set(key, value).await {
                Ok(()) => text_response(201, ""),
                Err(e) => text_response(500, e.to_string()),
            }
        }
        ("GET", key) => match state.cache.get(key).await {
            Ok(value) => json_response(200, &value),
            Err(e) => text_response(404, e.to_string()),
        },
        ("DELETE", key) => match state.cache.delete(key).await {
            Ok(()) => text_response(200, ""),
            Err(e) => text_response(404, e.to_string()),
        },
        _ => text_response(404, "not found"),
    }
}
