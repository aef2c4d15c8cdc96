//! SSO request authentication
//!
//! Callers prove their identity with a JWT minted by the SSO portal,
//! carried either in the SSO cookie or as a base64-encoded Bearer token.
//! Paths matched by a skip rule in the ACL bypass authentication entirely.
//! The token signature is verified against the shared HMAC secret before
//! any claims are trusted.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::auth::AccessController;
use crate::error::{GatewayError, Result};

/// Fallback cookie name when the deployment does not configure one.
const DEFAULT_SSO_COOKIE: &str = "iam-sso-test";

/// A caller that has signed in at the SSO portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub family_name: String,
    pub given_name: String,
    pub email: String,
    pub arn: String,
}

/// The identity claims inside an SSO token.
#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    family_name: String,
    #[serde(default)]
    given_name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    arn: String,
}

/// Request authenticator
pub struct Iam {
    access: AccessController,
    cookie_name: Option<String>,
    signing_key: Option<String>,
}

impl Iam {
    pub fn new(
        access: AccessController,
        cookie_name: Option<String>,
        signing_key: Option<String>,
    ) -> Self {
        Self {
            access,
            cookie_name,
            signing_key,
        }
    }

    /// Skip or authenticate a request.
    ///
    /// Returns `Ok(None)` when the path matches a bypass rule, `Ok(Some)`
    /// for an authenticated caller, and `Err` when both the cookie and the
    /// authorization header fail to produce a valid token.
    pub fn authenticate(&self, parts: &http::request::Parts) -> Result<Option<User>> {
        if self.access.skip(parts.uri.path()) {
            return Ok(None);
        }

        let mut errs: Vec<String> = Vec::new();

        match self.user_from_cookie(parts) {
            Ok(user) => return Ok(Some(user)),
            Err(e) => errs.push(e.to_string()),
        }

        match self.user_from_auth_header(parts) {
            Ok(user) => return Ok(Some(user)),
            Err(e) => errs.push(e.to_string()),
        }

        let flat: String = errs
            .iter()
            .enumerate()
            .map(|(i, e)| format!("err{}: {} ", i, e))
            .collect();
        Err(GatewayError::Forbidden(format!(
            "failed to authenticate: {}",
            flat
        )))
    }

    /// The SSO cookie name for this deployment.
    fn cookie_name(&self) -> &str {
        match &self.cookie_name {
            Some(name) => name,
            None => {
                tracing::debug!(
                    "IAM_SSO_COOKIE not configured, falling back to '{}'",
                    DEFAULT_SSO_COOKIE
                );
                DEFAULT_SSO_COOKIE
            }
        }
    }

    fn user_from_cookie(&self, parts: &http::request::Parts) -> Result<User> {
        let name = self.cookie_name();
        let token = find_cookie(parts, name)
            .ok_or_else(|| GatewayError::Forbidden(format!("cookie '{}' not present", name)))?;
        self.decode_token(&token)
    }

    fn user_from_auth_header(&self, parts: &http::request::Parts) -> Result<User> {
        let auth = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| GatewayError::Forbidden("expected authorization header".into()))?;

        let (_, after) = auth
            .split_once("Bearer")
            .ok_or_else(|| GatewayError::Forbidden("expected Bearer".into()))?;
        let ts = after.trim();
        if ts.is_empty() {
            return Err(GatewayError::Forbidden("expected Bearer token".into()));
        }

        // Bearer tokens arrive base64-wrapped around the JWT itself.
        let decoded = STANDARD
            .decode(ts)
            .map_err(|e| GatewayError::Forbidden(format!("bad bearer encoding: {}", e)))?;
        let token = String::from_utf8(decoded)
            .map_err(|e| GatewayError::Forbidden(format!("bad bearer encoding: {}", e)))?;
        self.decode_token(&token)
    }

    /// Verify the token signature (HS256 with the shared secret) and pull
    /// out the identity claims.
    fn decode_token(&self, token: &str) -> Result<User> {
        let key = self.signing_key.as_ref().ok_or_else(|| {
            GatewayError::Forbidden("unable to locate env var IAM_TOKEN_SIGNING_KEY".into())
        })?;

        let mut validation = Validation::new(Algorithm::HS256);
        // SSO tokens carry identity claims only; exp is honored when
        // present but not required
        validation.required_spec_claims.clear();
        validation.validate_aud = false;

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(key.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => GatewayError::Forbidden("signature is invalid".into()),
            _ => GatewayError::Forbidden(format!("invalid token: {}", e)),
        })?;

        Ok(User {
            family_name: data.claims.family_name,
            given_name: data.claims.given_name,
            email: data.claims.email,
            arn: data.claims.arn,
        })
    }
}

/// Find a cookie's value in the request's Cookie headers.
fn find_cookie(parts: &http::request::Parts, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    for header in parts.headers.get_all(http::header::COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for part in raw.split(';') {
            if let Some(value) = part.trim().strip_prefix(&prefix) {
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}
