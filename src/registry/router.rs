//! Path router — selects a backend for a request URL and rewrites it
//!
//! Candidates come from the registration store; the winner is the record
//! whose anchored pattern consumes the most of the path outside its first
//! capture group. When `/foo(/.*)` and `/foo/bar(/.*)` both match
//! `/foo/bar/baz`, the second wins because its unparenthesized portion is
//! longer. Records tied for that length are chosen among by weighted
//! random, so declared weights turn into proportional load distribution.

use rand::Rng;
use std::sync::Arc;
use url::Url;

use crate::error::{GatewayError, Result};
use crate::registry::{Registration, Registry};

/// Router over the registration store
pub struct PathRouter {
    registry: Arc<Registry>,
    /// Prefix retried on lookup misses; empty disables the fallback
    static_path: String,
}

/// Pull the path component out of a request URL string. Accepts both
/// absolute URLs and bare paths.
fn extract_path(surl: &str) -> String {
    if let Ok(u) = Url::parse(surl) {
        return u.path().to_string();
    }
    let end = surl.find(['?', '#']).unwrap_or(surl.len());
    surl[..end].to_string()
}

/// How much of `path` the pattern matched outside its first capture group.
fn unparenthesized_len(reg: &Registration, path: &str) -> usize {
    let Some(re) = reg.regex() else { return 0 };
    let Some(caps) = re.captures(path) else { return 0 };
    let full = caps.get(0).map(|m| m.len()).unwrap_or(0);
    let captured = caps.get(1).map(|m| m.len()).unwrap_or(0);
    full - captured
}

impl PathRouter {
    pub fn new(registry: Arc<Registry>, static_path: String) -> Self {
        Self {
            registry,
            static_path,
        }
    }

    /// Find the registration that best matches the given URL.
    pub async fn find_best_match(&self, surl: &str) -> Result<Registration> {
        let path = extract_path(surl);
        let regs = self.registry.enumerate_active().await?;
        let mut matches: Vec<Registration> = regs
            .into_iter()
            .filter(|reg| reg.regex().map(|re| re.is_match(&path)).unwrap_or(false))
            .collect();

        let best = match matches.len() {
            0 => {
                tracing::debug!(url = %surl, "no matching path");
                return Err(GatewayError::NotFound(
                    "no matching path was found".to_string(),
                ));
            }
            1 => matches.remove(0),
            _ => {
                // keep only the candidates tied for the longest
                // unparenthesized match, then pick by weight
                let mut bestlen = 0;
                let mut choices: Vec<Registration> = Vec::new();
                for reg in matches {
                    let matched_len = unparenthesized_len(&reg, &path);
                    if matched_len > bestlen {
                        bestlen = matched_len;
                        choices = vec![reg];
                    } else if matched_len == bestlen {
                        choices.push(reg);
                    }
                }
                choose_weighted(choices)?
            }
        };

        tracing::debug!(name = %best.name, address = %best.address, url = %surl, "selected backend");
        Ok(best)
    }

    /// Rewrite a request URL in place to point at the chosen backend.
    ///
    /// On a lookup miss with a configured static path, the path is prefixed
    /// and looked up once more; failures after that propagate. When the
    /// winning pattern captured a group, the capture replaces the path
    /// (path stripping). Scheme and host always come from the winner.
    pub async fn rewrite_url(&self, req_url: &mut Url) -> Result<()> {
        let target = match self.find_best_match(req_url.path()).await {
            Ok(t) => t,
            Err(e) if e.is_not_found() && !self.static_path.is_empty() => {
                let fallback = format!("{}{}", self.static_path, req_url.path());
                req_url.set_path(&fallback);
                self.find_best_match(req_url.path()).await.map_err(|e| {
                    tracing::debug!(error = %e, "static fallback lookup failed");
                    e
                })?
            }
            Err(e) => return Err(e),
        };

        let target_url = target
            .url()
            .ok_or_else(|| GatewayError::Internal("registration has no parsed address".into()))?;

        if let Some(re) = target.regex() {
            let captured = re
                .captures(req_url.path())
                .and_then(|caps| caps.get(1).map(|m| m.as_str().to_string()));
            if let Some(new_path) = captured {
                req_url.set_path(&new_path);
            }
        }

        req_url
            .set_scheme(target_url.scheme())
            .map_err(|_| GatewayError::Internal("cannot apply backend scheme".into()))?;
        req_url
            .set_host(target_url.host_str())
            .map_err(|e| GatewayError::Internal(format!("cannot apply backend host: {}", e)))?;
        req_url
            .set_port(target_url.port())
            .map_err(|_| GatewayError::Internal("cannot apply backend port".into()))?;
        Ok(())
    }
}

/// Weighted-random choice: pick uniformly in `[0, Σweights)` and walk the
/// candidates subtracting each weight until the target falls inside one.
fn choose_weighted(choices: Vec<Registration>) -> Result<Registration> {
    if choices.is_empty() {
        return Err(GatewayError::NotFound(
            "no matching path was found".to_string(),
        ));
    }
    let total: u64 = choices.iter().map(|c| c.weight as u64).sum();
    if total == 0 {
        return choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Internal("empty choice set".into()));
    }

    let mut target = rand::thread_rng().gen_range(0..total);
    for (ix, choice) in choices.iter().enumerate() {
        if target < choice.weight as u64 {
            return Ok(choices[ix].clone());
        }
        target -= choice.weight as u64;
    }
    // unreachable given target < total, but never panic on it
    Ok(choices[choices.len() - 1].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use std::collections::HashMap;

    fn reg(name: &str, addr: &str, pattern: &str, weight: u32) -> Registration {
        Registration::from_json(&format!(
            r#"{{"name":"{}","address":"{}","pattern":"{}","weight":{},"status":{{"path":"/status"}}}}"#,
            name, addr, pattern, weight
        ))
        .unwrap()
    }

    async fn router_with(regs: &[Registration]) -> PathRouter {
        let registry = Arc::new(Registry::new(Arc::new(MemoryCache::new()), 60));
        for r in regs {
            registry.register(r, true).await.unwrap();
        }
        PathRouter::new(registry, String::new())
    }

    #[test]
    fn test_extract_path() {
        assert_eq!(extract_path("http://x/user/login"), "/user/login");
        assert_eq!(extract_path("/user/login"), "/user/login");
        assert_eq!(extract_path("/user?q=1"), "/user");
    }

    #[test]
    fn test_unparenthesized_len() {
        let plain = reg("a", "http://1.1.1.1:1", "/user", 0);
        assert_eq!(unparenthesized_len(&plain, "/user/login"), 5);

        let capturing = reg("b", "http://1.1.1.1:1", "/foo/bar(/.*)", 0);
        assert_eq!(unparenthesized_len(&capturing, "/foo/bar/baz"), 8);
    }

    #[tokio::test]
    async fn test_single_match() {
        let router = router_with(&[reg("user", "http://1.1.1.1:8080", "/user", 0)]).await;
        let best = router.find_best_match("http://x/user/login").await.unwrap();
        assert_eq!(best.name, "user");
    }

    #[tokio::test]
    async fn test_no_match_is_not_found() {
        let router = router_with(&[reg("user", "http://1.1.1.1:8080", "/user", 0)]).await;
        let err = router.find_best_match("http://x/login").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_anchored_matching() {
        let router = router_with(&[
            reg("tags", "http://1.1.1.1:8081", "/tags", 0),
            reg("default", "http://1.1.1.3:8080", "/", 0),
        ])
        .await;
        // /tags only matches at the start of the path
        let best = router
            .find_best_match("http://x/something/tags/whatever")
            .await
            .unwrap();
        assert_eq!(best.name, "default");
    }

    #[tokio::test]
    async fn test_longest_unparenthesized_match_wins() {
        let router = router_with(&[
            reg("outer", "http://1.1.1.1:8080", "/foo(/.*)", 0),
            reg("inner", "http://1.1.1.2:8080", "/foo/bar(/.*)", 0),
        ])
        .await;
        for _ in 0..10 {
            let best = router.find_best_match("http://x/foo/bar/baz").await.unwrap();
            assert_eq!(best.name, "inner");
        }
    }

    #[tokio::test]
    async fn test_more_specific_plain_pattern_wins() {
        let router = router_with(&[
            reg("tags", "http://1.1.1.1:8081", "/tags", 0),
            reg("newtags", "http://1.1.1.2:8091", "/tags/extra", 0),
        ])
        .await;
        for _ in 0..10 {
            let best = router
                .find_best_match("http://x/tags/extra/whatever")
                .await
                .unwrap();
            assert_eq!(best.name, "newtags");
        }
    }

    #[tokio::test]
    async fn test_rewrite_plain() {
        let router = router_with(&[reg("user", "http://1.1.1.1:8080", "/user", 0)]).await;
        let mut u = Url::parse("http://testserver.com/user/login").unwrap();
        router.rewrite_url(&mut u).await.unwrap();
        assert_eq!(u.as_str(), "http://1.1.1.1:8080/user/login");
    }

    #[tokio::test]
    async fn test_rewrite_strips_captured_path() {
        let router = router_with(&[reg("rewrite", "http://1.1.1.4:8081", "/rewrite(/.*)", 0)]).await;
        let mut u = Url::parse("http://testserver.com/rewrite/login").unwrap();
        router.rewrite_url(&mut u).await.unwrap();
        assert_eq!(u.as_str(), "http://1.1.1.4:8081/login");
    }

    #[tokio::test]
    async fn test_rewrite_inner_pattern() {
        let router = router_with(&[
            reg("outer", "http://1.1.1.1:8080", "/foo(/.*)", 0),
            reg("inner", "http://1.1.1.2:8080", "/foo/bar(/.*)", 0),
        ])
        .await;
        let mut u = Url::parse("http://x/foo/bar/baz").unwrap();
        router.rewrite_url(&mut u).await.unwrap();
        assert_eq!(u.as_str(), "http://1.1.1.2:8080/baz");
    }

    #[tokio::test]
    async fn test_rewrite_no_match_without_static_path() {
        let router = router_with(&[reg("user", "http://1.1.1.1:8080", "/user", 0)]).await;
        let mut u = Url::parse("http://x/nowhere").unwrap();
        assert!(router.rewrite_url(&mut u).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_rewrite_static_fallback() {
        let registry = Arc::new(Registry::new(Arc::new(MemoryCache::new()), 60));
        registry
            .register(&reg("static", "http://1.1.1.9:8080", "/static", 0), true)
            .await
            .unwrap();
        let router = PathRouter::new(registry, "/static".to_string());

        let mut u = Url::parse("http://x/index.html").unwrap();
        router.rewrite_url(&mut u).await.unwrap();
        assert_eq!(u.as_str(), "http://1.1.1.9:8080/static/index.html");
    }

    #[tokio::test]
    async fn test_rewrite_static_fallback_miss_propagates() {
        let registry = Arc::new(Registry::new(Arc::new(MemoryCache::new()), 60));
        let router = PathRouter::new(registry, "/static".to_string());
        let mut u = Url::parse("http://x/index.html").unwrap();
        assert!(router.rewrite_url(&mut u).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_weighted_choice_single_candidate() {
        let only = reg("a", "http://1.1.1.1:1", "/a", 100);
        let picked = choose_weighted(vec![only.clone()]).unwrap();
        assert_eq!(picked.name, only.name);
    }

    #[tokio::test]
    async fn test_weighted_distribution() {
        let router = router_with(&[
            reg("tags", "http://1.1.1.1:8081", "/tags", 90),
            reg("tags", "http://1.1.1.2:8081", "/tags", 10),
        ])
        .await;

        let mut output: HashMap<String, u32> = HashMap::new();
        for _ in 0..100 {
            let mut u = Url::parse("http://testserver.com/tags/whatever").unwrap();
            router.rewrite_url(&mut u).await.unwrap();
            *output.entry(u.to_string()).or_insert(0) += 1;
        }

        // This can fail on an unlucky draw, but not often enough to matter.
        let heavy = *output
            .get("http://1.1.1.1:8081/tags/whatever")
            .unwrap_or(&0);
        let light = *output
            .get("http://1.1.1.2:8081/tags/whatever")
            .unwrap_or(&0);
        assert_eq!(heavy + light, 100);
        assert!((83..=97).contains(&heavy), "heavy={}", heavy);
        assert!((3..=17).contains(&light), "light={}", light);
    }

    #[tokio::test]
    async fn test_both_replicas_receive_traffic() {
        let router = router_with(&[
            reg("user", "http://1.1.1.1:8080", "/user", 0),
            reg("user", "http://1.1.1.2:8080", "/user", 0),
        ])
        .await;

        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            let best = router.find_best_match("http://x/user").await.unwrap();
            seen.insert(best.address.clone());
        }
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_record_not_routable() {
        let registry = Arc::new(Registry::new(Arc::new(MemoryCache::new()), 60));
        let mut r = reg("user", "http://1.1.1.1:8080", "/user", 0);
        registry.register(&r, true).await.unwrap();
        r.disabled = true;
        registry.save(&r).await.unwrap();

        let router = PathRouter::new(registry, String::new());
        let err = router.find_best_match("http://x/user").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
