//! Outbound forwarder — relays a rewritten request to its backend

use bytes::Bytes;
use std::time::Duration;
use url::Url;

use crate::error::{GatewayError, Result};

/// Forwarding client used by the proxy front-end
pub struct ProxyClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl ProxyClient {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(100)
            .build()
            .unwrap_or_default();
        Self { client, timeout }
    }

    /// Send the request to the rewritten URL and buffer the response.
    pub async fn forward(
        &self,
        method: &http::Method,
        target: &Url,
        headers: &http::HeaderMap,
        body: Bytes,
    ) -> Result<ProxyResponse> {
        let mut req_builder = self.client.request(method.clone(), target.clone());

        for (key, value) in headers.iter() {
            if !is_hop_by_hop(key.as_str()) && key != http::header::HOST {
                req_builder = req_builder.header(key.clone(), value.clone());
            }
        }

        let response = req_builder.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Upstream(format!(
                    "backend {} timed out after {}ms",
                    target,
                    self.timeout.as_millis()
                ))
            } else if e.is_connect() {
                GatewayError::Upstream(format!("cannot connect to backend {}: {}", target, e))
            } else {
                GatewayError::Http(e)
            }
        })?;

        let status = response.status();
        let resp_headers = response.headers().clone();
        let resp_body = response.bytes().await.map_err(GatewayError::Http)?;

        Ok(ProxyResponse {
            status,
            headers: resp_headers,
            body: resp_body,
        })
    }
}

impl Default for ProxyClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Response relayed from a backend
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: reqwest::StatusCode,
    pub headers: reqwest::header::HeaderMap,
    pub body: Bytes,
}

/// Hop-by-hop headers are consumed by each hop and never forwarded.
pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("keep-alive"));
        assert!(is_hop_by_hop("Transfer-Encoding"));
        assert!(is_hop_by_hop("Upgrade"));

        assert!(!is_hop_by_hop("Content-Type"));
        assert!(!is_hop_by_hop("Authorization"));
        assert!(!is_hop_by_hop("X-USER-ARN"));
    }

    #[test]
    fn test_default_timeout() {
        let proxy = ProxyClient::default();
        assert_eq!(proxy.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_upstream_error() {
        let proxy = ProxyClient::with_timeout(Duration::from_millis(500));
        let target = Url::parse("http://127.0.0.1:1/x").unwrap();
        let err = proxy
            .forward(
                &http::Method::GET,
                &target,
                &http::HeaderMap::new(),
                Bytes::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Upstream(_)));
    }
}
