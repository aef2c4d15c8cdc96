//! Health collector — periodic probe fan-out and snapshot publication
//!
//! On each loop the collector probes every registration's status endpoint
//! (disabled ones included, so they can come back), applies consecutive
//! failure/success streaks against the record's downcount/upcount
//! thresholds, cross-checks the expected-service list, and publishes a
//! fresh snapshot for the status endpoints.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Result;
use crate::health::{hash_item_id, LoopTimer, StatusBlock, StatusHandle, StatusItem};
use crate::registry::{Registration, Registry};

/// Once disabled, a record only survives this long without recovering.
const DISABLED_EXPIRE_SECS: u64 = 300;

/// Consecutive probe outcomes for one registration hash.
#[derive(Debug, Default, Clone, Copy)]
struct Streak {
    failures: u32,
    successes: u32,
}

/// Fields the gateway reports about itself in the snapshot.
#[derive(Debug, Clone, Default)]
pub struct GatewayIdentity {
    pub name: String,
    pub port: String,
    pub revision: String,
    pub deploytag: String,
    pub deploytype: String,
    pub configversion: String,
}

/// The periodic health collector
pub struct HealthCollector {
    registry: Arc<Registry>,
    status: Arc<StatusHandle>,
    timer: Arc<LoopTimer>,
    client: reqwest::Client,
    expected: HashSet<String>,
    identity: GatewayIdentity,
    streaks: Mutex<HashMap<String, Streak>>,
}

impl HealthCollector {
    pub fn new(
        registry: Arc<Registry>,
        status: Arc<StatusHandle>,
        timer: Arc<LoopTimer>,
        probe_timeout: Duration,
        expected: Vec<String>,
        identity: GatewayIdentity,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(probe_timeout)
            .build()
            .unwrap_or_default();
        Self {
            registry,
            status,
            timer,
            client,
            expected: expected.into_iter().collect(),
            identity,
            streaks: Mutex::new(HashMap::new()),
        }
    }

    /// Drive the loop timer forever. A loop completes fully before the next
    /// deadline is scheduled.
    pub async fn run(self: Arc<Self>) {
        loop {
            self.timer.wait_tick().await;
            if self.timer.due() {
                self.collect_once().await;
                self.timer.advance();
            }
        }
    }

    /// One collection pass: probe everything, update disabled flags, and
    /// publish the new snapshot.
    pub async fn collect_once(&self) {
        let regs = match self.registry.enumerate_all().await {
            Ok(regs) => regs,
            Err(e) => {
                tracing::error!(error = %e, "status loop could not enumerate registrations");
                return;
            }
        };

        let mut notfound = self.expected.clone();
        let mut block: StatusBlock = Vec::with_capacity(regs.len() + 1);

        self.prune_streaks(&regs);

        for mut reg in regs {
            let mut item = self.probe(&mut reg).await;

            item.insert("Name", reg.name.clone());
            item.insert("Address", reg.address.clone());
            item.insert(
                "Port",
                reg.url()
                    .and_then(|u| u.port())
                    .map(|p| p.to_string())
                    .unwrap_or_default(),
            );
            item.insert("disabled", reg.disabled);

            if item.get_str("Error").is_empty() {
                let id = hash_item_id(&item);
                item.insert("ID", id);
            }

            if !notfound.remove(&reg.name) {
                // more than one copy of an expected service is fine; only
                // names never configured get flagged
                if !self.expected.contains(&reg.name) {
                    item.insert("unexpected", true);
                }
            }

            block.push(item);
        }

        for name in &notfound {
            let mut item = StatusItem::new();
            item.insert("Name", name.clone());
            item.insert("Port", "");
            item.insert("Error", "Expected service not found.");
            item.insert("StatusCode", 503);
            block.push(item);
        }

        block.sort_by_key(|item| format!("{}{}", item.get_str("Name"), item.get_str("Port")));

        block.push(self.own_item());
        self.status.publish(block).await;
    }

    /// Probe one backend and apply the disable/enable hysteresis.
    async fn probe(&self, reg: &mut Registration) -> StatusItem {
        let mut item = StatusItem::new();
        let Some(mut probe_url) = reg.url().cloned() else {
            item.insert("Error", "registration has no parsed address");
            item.insert("StatusCode", 503);
            return item;
        };
        probe_url.set_path(&reg.status.path);

        match self.client.get(probe_url.clone()).send().await {
            Ok(resp) => {
                let code = resp.status().as_u16();
                let body = resp.bytes().await.unwrap_or_default();
                match serde_json::from_slice::<StatusItem>(&body) {
                    Ok(reported) => item = reported,
                    Err(_) => {
                        item.insert("StatusBody", String::from_utf8_lossy(&body).to_string());
                    }
                }
                item.insert("StatusCode", code);
                self.record_success(reg).await;
            }
            Err(e) => {
                tracing::debug!(url = %probe_url, error = %e, "status probe failed");
                item.insert("Error", format!("GET from {} failed.", probe_url));
                item.insert("StatusCode", 503);
                self.record_failure(reg).await;
            }
        }
        item
    }

    async fn record_failure(&self, reg: &mut Registration) {
        let failures = {
            let mut streaks = self.streaks.lock().unwrap();
            let streak = streaks.entry(reg.hash().to_string()).or_default();
            streak.failures += 1;
            streak.successes = 0;
            streak.failures
        };

        if !reg.disabled && failures >= reg.status.downcount {
            reg.disabled = true;
            if let Err(e) = self.disable(reg).await {
                tracing::error!(name = %reg.name, error = %e, "could not persist disabled state");
                return;
            }
            tracing::warn!(
                name = %reg.name,
                address = %reg.address,
                failures,
                "backend disabled"
            );
        } else if reg.disabled {
            // still down: keep the short expiration armed so a dead
            // service eventually falls out of the registry
            let _ = self.registry.expire_in(reg, DISABLED_EXPIRE_SECS).await;
        }
    }

    async fn record_success(&self, reg: &mut Registration) {
        let successes = {
            let mut streaks = self.streaks.lock().unwrap();
            let streak = streaks.entry(reg.hash().to_string()).or_default();
            streak.successes += 1;
            streak.failures = 0;
            streak.successes
        };

        if reg.disabled {
            if successes >= reg.status.upcount {
                reg.disabled = false;
                if let Err(e) = self.registry.save(reg).await {
                    tracing::error!(name = %reg.name, error = %e, "could not persist re-enabled state");
                    return;
                }
                tracing::info!(
                    name = %reg.name,
                    address = %reg.address,
                    successes,
                    "backend re-enabled"
                );
            } else {
                // recovering but not proven yet; don't let it expire mid-recovery
                let _ = self.registry.expire_in(reg, DISABLED_EXPIRE_SECS).await;
            }
        }
    }

    async fn disable(&self, reg: &Registration) -> Result<()> {
        self.registry.save(reg).await?;
        self.registry.expire_in(reg, DISABLED_EXPIRE_SECS).await
    }

    /// Drop streaks for registrations that no longer exist.
    fn prune_streaks(&self, regs: &[Registration]) {
        let live: HashSet<&str> = regs.iter().map(|r| r.hash()).collect();
        let mut streaks = self.streaks.lock().unwrap();
        streaks.retain(|hash, _| live.contains(hash.as_str()));
    }

    /// The gateway's own entry in the snapshot.
    fn own_item(&self) -> StatusItem {
        let mut item = StatusItem::new();
        item.insert("Name", self.identity.name.clone());
        item.insert("Port", self.identity.port.clone());
        item.insert("StatusCode", 200);
        item.insert("revision", self.identity.revision.clone());
        item.insert("deploytag", self.identity.deploytag.clone());
        item.insert("configtype", self.identity.deploytype.clone());
        item.insert("configversion", self.identity.configversion.clone());
        item.insert("pid", std::process::id());
        if let Some(ip) = local_ip() {
            item.insert("ip", ip.clone());
            item.insert("Address", format!("http://{}:{}", ip, self.identity.port));
        }
        item
    }
}

/// Best-effort local address discovery: a connected UDP socket tells us
/// which interface the OS would route external traffic through. No packets
/// are sent.
fn local_ip() -> Option<String> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|a| a.ip().to_string())
}
