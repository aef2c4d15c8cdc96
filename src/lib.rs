//! # beacon-gateway
//!
//! A service-discovery reverse proxy. Backend services register a URL-path
//! pattern and the address they serve on; the gateway routes public
//! traffic to the best-matching backend, authenticates callers against the
//! SSO portal's JWTs, and aggregates backend health into a status surface.
//!
//! ## Architecture
//!
//! ```text
//! proxy port ──► auth (ACL → JWT) ──► router ──► backend
//! registry port ──► register/refresh/unregister ──► store ──► cache
//! status port ◄── snapshot ◄── health collector (loop timer)
//! ```
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use beacon_gateway::auth::{AccessController, Iam};
//! use beacon_gateway::cache::MemoryCache;
//! use beacon_gateway::config::{Cli, Settings};
//! use clap::Parser;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> beacon_gateway::Result<()> {
//!     let settings = Settings::resolve(&Cli::parse())?;
//!     let iam = Iam::new(
//!         AccessController::from_file("acl.json")?,
//!         settings.sso_cookie.clone(),
//!         settings.token_signing_key.clone(),
//!     );
//!     let (_state, handles) =
//!         beacon_gateway::server::spawn_gateway(settings, iam, Arc::new(MemoryCache::new())).await?;
//!     for handle in handles {
//!         let _ = handle.await;
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod proxy_client;
pub mod registry;
pub mod server;

// Re-export main types
pub use error::{GatewayError, Result};
pub use registry::{PathRouter, Registration, Registry};
