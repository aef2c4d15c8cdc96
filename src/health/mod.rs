//! Aggregated backend health: status items, snapshots, and the collector

mod collector;
mod timer;

pub use collector::{GatewayIdentity, HealthCollector};
pub use timer::LoopTimer;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One backend's health report: a free-form JSON object decorated with the
/// gateway's own bookkeeping fields (`Name`, `Address`, `Port`,
/// `StatusCode`, `disabled`, …) plus whatever the backend returned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusItem(pub serde_json::Map<String, Value>);

impl StatusItem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Fetch a field as a string; non-strings and missing fields read as "".
    pub fn get_str(&self, key: &str) -> &str {
        self.0.get(key).and_then(Value::as_str).unwrap_or("")
    }

    pub fn status_code(&self) -> Option<i64> {
        self.0.get("StatusCode").and_then(Value::as_i64)
    }

    /// Whether the backend answered with a 2xx.
    pub fn is_ok(&self) -> bool {
        matches!(self.status_code(), Some(code) if (200..=299).contains(&code))
    }
}

/// The published snapshot: one item per known backend, sorted by name+port.
pub type StatusBlock = Vec<StatusItem>;

/// Stable identity for a healthy item, derived from the fields that change
/// when a backend restarts or is redeployed.
pub(crate) fn hash_item_id(item: &StatusItem) -> String {
    crate::registry::hash_fields(&[
        item.get_str("starttime"),
        item.get_str("Name"),
        item.get_str("revision"),
        item.get_str("configtype"),
        item.get_str("configversion"),
        item.get_str("Address"),
        item.get_str("Port"),
    ])
}

/// Every item in the block reported a 2xx.
pub fn all_ok(block: &StatusBlock) -> bool {
    block.iter().all(StatusItem::is_ok)
}

/// Shared handle to the most recent snapshot. The collector replaces the
/// inner `Arc` wholesale, so readers always observe one consistent block.
#[derive(Default)]
pub struct StatusHandle {
    current: RwLock<Arc<StatusBlock>>,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot.
    pub async fn publish(&self, block: StatusBlock) {
        let mut current = self.current.write().await;
        *current = Arc::new(block);
    }

    /// The latest snapshot.
    pub async fn snapshot(&self) -> Arc<StatusBlock> {
        self.current.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_item_get_str() {
        let mut item = StatusItem::new();
        item.insert("Name", "user");
        item.insert("StatusCode", 200);
        assert_eq!(item.get_str("Name"), "user");
        assert_eq!(item.get_str("Missing"), "");
        assert_eq!(item.get_str("StatusCode"), ""); // not a string
    }

    #[test]
    fn test_status_item_is_ok() {
        let mut item = StatusItem::new();
        assert!(!item.is_ok()); // no code at all
        item.insert("StatusCode", 204);
        assert!(item.is_ok());
        item.insert("StatusCode", 503);
        assert!(!item.is_ok());
    }

    #[test]
    fn test_all_ok() {
        let mut good = StatusItem::new();
        good.insert("StatusCode", 200);
        let mut bad = StatusItem::new();
        bad.insert("StatusCode", 500);

        assert!(all_ok(&vec![good.clone(), good.clone()]));
        assert!(!all_ok(&vec![good, bad]));
        assert!(all_ok(&Vec::new()));
    }

    #[test]
    fn test_status_item_serializes_flat() {
        let mut item = StatusItem::new();
        item.insert("Name", "user");
        let json = serde_json::to_string(&item).unwrap();
        assert_eq!(json, r#"{"Name":"user"}"#);
    }

    #[tokio::test]
    async fn test_snapshot_replacement() {
        let handle = StatusHandle::new();
        assert!(handle.snapshot().await.is_empty());

        let mut item = StatusItem::new();
        item.insert("Name", "a");
        handle.publish(vec![item]).await;

        let snap = handle.snapshot().await;
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].get_str("Name"), "a");

        // An old handle still reads its own consistent block.
        handle.publish(Vec::new()).await;
        assert_eq!(snap.len(), 1);
        assert!(handle.snapshot().await.is_empty());
    }
}
