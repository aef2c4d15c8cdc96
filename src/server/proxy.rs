//! Proxy front-end — the public request pipeline
//!
//! Every request gets the CORS headers; OPTIONS preflights short-circuit
//! before authentication. Everything else is authenticated (or bypassed by
//! an ACL rule), rewritten by the router, and relayed to the chosen
//! backend.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::sync::Arc;
use std::time::Instant;
use url::Url;

use super::{apply_cors, text_response, AppState};
use crate::error::GatewayError;

pub(crate) async fn handle(req: Request<Incoming>, state: Arc<AppState>) -> Response<Full<Bytes>> {
    let start = Instant::now();
    let (parts, body) = req.into_parts();

    if parts.method == hyper::Method::OPTIONS {
        let mut resp = text_response(200, "");
        apply_cors(resp.headers_mut(), &state.settings);
        return resp;
    }

    let user = match state.iam.authenticate(&parts) {
        Ok(user) => user,
        Err(e) => {
            tracing::info!(path = parts.uri.path(), error = %e, "authentication rejected");
            let mut resp = text_response(403, e.to_string());
            apply_cors(resp.headers_mut(), &state.settings);
            return resp;
        }
    };

    // Rebuild an absolute URL for the router; scheme and host are about to
    // be replaced with the winning backend's.
    let host = parts
        .headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let original = format!("http://{}{}", host, path_and_query);

    let mut target = match Url::parse(&original) {
        Ok(u) => u,
        Err(e) => {
            let mut resp = text_response(400, format!("unparseable request URL: {}", e));
            apply_cors(resp.headers_mut(), &state.settings);
            return resp;
        }
    };

    if let Err(e) = state.router.rewrite_url(&mut target).await {
        let mut resp = if e.is_not_found() {
            text_response(404, e.to_string())
        } else {
            text_response(500, e.to_string())
        };
        apply_cors(resp.headers_mut(), &state.settings);
        add_user_arn(&mut resp, &user);
        return resp;
    }

    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };

    let mut resp = match state
        .client
        .forward(&parts.method, &target, &parts.headers, body_bytes)
        .await
    {
        Ok(proxied) => {
            let mut builder = Response::builder().status(proxied.status.as_u16());
            for (key, value) in proxied.headers.iter() {
                // the body is re-framed for the client, so connection-level
                // headers from the backend must not leak through
                if !crate::proxy_client::is_hop_by_hop(key.as_str()) {
                    builder = builder.header(key, value);
                }
            }
            builder
                .body(Full::new(proxied.body))
                .unwrap_or_else(|e| text_response(502, format!("bad backend response: {}", e)))
        }
        Err(GatewayError::Upstream(msg)) => {
            tracing::warn!(target = %target, error = %msg, "backend unreachable");
            text_response(502, msg)
        }
        Err(e) => {
            tracing::error!(target = %target, error = %e, "forwarding failed");
            text_response(502, e.to_string())
        }
    };

    apply_cors(resp.headers_mut(), &state.settings);
    add_user_arn(&mut resp, &user);

    tracing::info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        from = %original,
        to = %target,
        status = resp.status().as_u16(),
        "proxied"
    );
    resp
}

/// Tell backends (and the caller) who the authenticated user is.
fn add_user_arn(resp: &mut Response<Full<Bytes>>, user: &Option<crate::auth::User>) {
    if let Some(user) = user {
        if let Ok(arn) = http::HeaderValue::from_str(&user.arn) {
            resp.headers_mut()
                .insert(http::HeaderName::from_static("x-user-arn"), arn);
        }
    }
}
