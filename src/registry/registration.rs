//! Registration records — what a backend declares about itself
//!
//! A backend registers a name, the address it serves on, the URL-path
//! pattern it wants routed to it, and where its health endpoint lives.
//! Records are validated and completed once (`set_defaults`), then stored
//! as JSON; the compiled pattern, parsed address, and identity hash are
//! rebuilt whenever a record is decoded.

use md5::{Digest, Md5};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{GatewayError, Result};

/// MD5 over the concatenation of the given fields, rendered as lowercase
/// hex. Identity for registrations and for status items.
pub fn hash_fields(parts: &[&str]) -> String {
    let mut hasher = Md5::new();
    for p in parts {
        hasher.update(p.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Health-probe declaration inside a registration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusProbe {
    /// Path appended to the backend address to form the probe URL
    pub path: String,
    /// Consecutive failed probes before the backend is disabled
    #[serde(default)]
    pub downcount: u32,
    /// Consecutive successful probes before a disabled backend returns
    #[serde(default)]
    pub upcount: u32,
}

/// A backend registration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registration {
    pub name: String,
    pub address: String,
    pub pattern: String,
    #[serde(default)]
    pub weight: u32,
    #[serde(rename = "status", default)]
    pub status: StatusProbe,
    #[serde(default)]
    pub disabled: bool,

    #[serde(skip)]
    hash: String,
    #[serde(skip)]
    regex: Option<Regex>,
    #[serde(skip)]
    url: Option<Url>,
}

impl Registration {
    /// Decode a registration from its stored JSON form, rebuilding the
    /// derived fields.
    pub fn from_json(j: &str) -> Result<Self> {
        let mut reg: Registration = serde_json::from_str(j)?;
        reg.set_defaults()?;
        Ok(reg)
    }

    /// Validate a freshly decoded record and fill in defaults. Must be
    /// called before the record is stored or matched against.
    pub fn set_defaults(&mut self) -> Result<()> {
        if self.name.is_empty() {
            return Err(GatewayError::Invalid("the name field cannot be blank".into()));
        }
        if self.address.is_empty() {
            return Err(GatewayError::Invalid(
                "the address field cannot be blank".into(),
            ));
        }
        let url = Url::parse(&self.address)
            .map_err(|e| GatewayError::Invalid(format!("bad address '{}': {}", self.address, e)))?;
        if self.pattern.is_empty() {
            return Err(GatewayError::Invalid(
                "the pattern field cannot be blank".into(),
            ));
        }
        self.compile_pattern()?;
        if self.status.path.is_empty() {
            return Err(GatewayError::Invalid(
                "the status path field cannot be blank".into(),
            ));
        }
        if self.weight == 0 {
            self.weight = 100;
        }
        if self.status.downcount == 0 {
            self.status.downcount = 2;
        }
        if self.status.upcount == 0 {
            self.status.upcount = 3;
        }
        self.url = Some(url);
        self.hash = hash_fields(&[&self.name, &self.address]);
        Ok(())
    }

    /// Patterns are anchored at the start of the path before compiling.
    fn compile_pattern(&mut self) -> Result<()> {
        let pat = format!("^{}", self.pattern);
        let regex = Regex::new(&pat).map_err(|_| {
            GatewayError::Invalid(format!("the pattern '{}' is not a valid path expression", pat))
        })?;
        self.regex = Some(regex);
        Ok(())
    }

    /// The record's identity: md5(name ‖ address), set by `set_defaults`.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// The compiled anchored pattern; present after `set_defaults`.
    pub fn regex(&self) -> Option<&Regex> {
        self.regex.as_ref()
    }

    /// The parsed backend address; present after `set_defaults`.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// The stored (JSON) form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
