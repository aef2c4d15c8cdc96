//! Status surface — aggregated backend health
//!
//! Reads are served from the collector's latest snapshot; nothing here
//! probes a backend directly. Detail and summary reads nudge the collector
//! to refresh soon, so watching the status keeps it current.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::sync::Arc;

use super::{apply_cors, json_response, text_response, AppState};
use crate::health::{all_ok, StatusItem};

pub(crate) async fn handle(req: Request<Incoming>, state: Arc<AppState>) -> Response<Full<Bytes>> {
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();
    respond(&method, &path, &state).await
}

/// Shared entry point: the status surface is mounted on both the status
/// port and the registry port.
pub(crate) async fn respond(method: &str, path: &str, state: &AppState) -> Response<Full<Bytes>> {
    if method == "OPTIONS" {
        let mut resp = text_response(200, "");
        apply_cors(resp.headers_mut(), &state.settings);
        return resp;
    }

    match (method, path) {
        ("GET", "/status") => general(state).await,
        ("GET", "/status/strict") => strict(state).await,
        ("GET", "/status/detail") => detail(state).await,
        ("GET", "/status/summary") => summary(state).await,
        _ => text_response(404, "not found"),
    }
}

/// GET /status — always 200 so the surface itself can be probed; failing
/// backends are logged, not reported.
async fn general(state: &AppState) -> Response<Full<Bytes>> {
    let snapshot = state.status.snapshot().await;
    let mut failing = 0;
    for item in snapshot.iter() {
        if !item.is_ok() {
            failing += 1;
            tracing::warn!(
                name = item.get_str("Name"),
                code = item.status_code().unwrap_or(0),
                "status problem"
            );
        }
    }
    text_response(
        200,
        format!(
            "{} services tracked, {} reporting failures\n",
            snapshot.len(),
            failing
        ),
    )
}

/// GET /status/strict — 500 unless every tracked service is healthy.
async fn strict(state: &AppState) -> Response<Full<Bytes>> {
    let snapshot = state.status.snapshot().await;
    if all_ok(&snapshot) {
        text_response(200, "ok\n")
    } else {
        text_response(500, "At least one server is reporting a failure.")
    }
}

/// GET /status/detail — the full snapshot as JSON.
async fn detail(state: &AppState) -> Response<Full<Bytes>> {
    let snapshot = state.status.snapshot().await;
    state.refresh_status_soon();
    json_response(200, &*snapshot)
}

/// GET /status/summary — a fixed-width table for humans.
async fn summary(state: &AppState) -> Response<Full<Bytes>> {
    let snapshot = state.status.snapshot().await;
    let mut out = summary_line("State", "Code", "Ver", "Name");
    for item in snapshot.iter() {
        out.push_str(&summary_item_line(item));
    }
    state.refresh_status_soon();
    text_response(200, out)
}

fn summary_line(state: &str, code: &str, ver: &str, name: &str) -> String {
    format!("{:>7} {:>6} {:>26}  {}\n", state, code, ver, name)
}

fn summary_item_line(item: &StatusItem) -> String {
    let state = if item.is_ok() { "ok" } else { "NOT OK" };
    let code = item.status_code().unwrap_or(0).to_string();
    let mut tag = item.get_str("deploytag");
    if tag.is_empty() {
        tag = "unknown";
    }
    summary_line(state, &code, tag, item.get_str("Name"))
}
