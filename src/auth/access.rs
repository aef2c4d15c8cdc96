//! Path access controller — which request paths skip authentication
//!
//! Rules are loaded once from a JSON document of the shape
//! `[{"path": "<regex>", "skip": <bool>}, …]` and evaluated in file order;
//! the first rule whose regex matches the request path decides. No match
//! means authentication is required.

use regex::Regex;
use serde::Deserialize;
use std::path::Path;

use crate::error::{GatewayError, Result};

/// A rule as it appears in the ACL file.
#[derive(Debug, Deserialize)]
struct RawRule {
    path: String,
    skip: bool,
}

/// A compiled rule.
#[derive(Debug)]
struct Rule {
    regex: Regex,
    skip: bool,
}

/// Ordered list of compiled bypass rules
#[derive(Debug, Default)]
pub struct AccessController {
    rules: Vec<Rule>,
}

impl AccessController {
    /// An ACL with no rules: every path requires authentication.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile rules from their JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: Vec<RawRule> = serde_json::from_str(json)?;
        let mut rules = Vec::with_capacity(raw.len());
        for r in raw {
            let regex = Regex::new(&r.path).map_err(|e| {
                GatewayError::Config(format!("bad ACL rule regex '{}': {}", r.path, e))
            })?;
            rules.push(Rule {
                regex,
                skip: r.skip,
            });
        }
        Ok(Self { rules })
    }

    /// Load rules from a file. A missing file yields an empty rule list;
    /// a present but malformed file is an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "ACL file not found, all paths will require authentication"
            );
            return Ok(Self::empty());
        }
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Whether the given request path skips authentication.
    pub fn skip(&self, path: &str) -> bool {
        for rule in &self.rules {
            if rule.regex.is_match(path) {
                tracing::debug!(path, rule = %rule.regex.as_str(), skip = rule.skip, "ACL rule matched");
                return rule.skip;
            }
        }
        false
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}
