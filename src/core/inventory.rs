//! Host network interface inventory.
//!
//! Interface names come from `sysinfo`, addresses from `ip -o -4 addr`, link
//! state from `/sys/class/net/<name>/carrier`. Nothing is cached: link state
//! changes underneath us whenever a cable is plugged or pulled.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use sysinfo::Networks;

use super::runner::{CommandLine, CommandRunner};

/// Whether an interface is a physical NIC or the software bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    Physical,
    Bridge,
}

/// A host-visible (or synthesized bridge) interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInterface {
    pub name: String,
    pub kind: InterfaceKind,
    /// IPv4 addresses without prefix length, in the order the kernel reports them.
    pub addresses: Vec<String>,
}

#[async_trait]
pub trait InterfaceInventory: Send + Sync {
    /// All interfaces, plus a synthesized bridge entry when the bridge does not exist yet.
    async fn list_interfaces(&self) -> Vec<NetworkInterface>;

    /// IPv4 addresses of `name`. Empty means "no device connected".
    async fn addresses_for(&self, name: &str) -> Vec<String>;

    /// Whether `name` reports carrier (a cable with a live peer).
    async fn has_carrier(&self, name: &str) -> bool;
}

/// Inventory backed by the running host.
pub struct SystemInventory {
    runner: Arc<dyn CommandRunner>,
    bridge_name: String,
    sysfs_root: PathBuf,
}

impl SystemInventory {
    pub fn new(runner: Arc<dyn CommandRunner>, bridge_name: impl Into<String>) -> Self {
        Self {
            runner,
            bridge_name: bridge_name.into(),
            sysfs_root: PathBuf::from("/sys/class/net"),
        }
    }

    fn is_bridge_device(&self, name: &str) -> bool {
        name == self.bridge_name || self.sysfs_root.join(name).join("bridge").is_dir()
    }

    async fn interface_names() -> Vec<String> {
        let names = tokio::task::spawn_blocking(|| {
            let networks = Networks::new_with_refreshed_list();
            networks.list().keys().cloned().collect::<Vec<_>>()
        })
        .await;
        match names {
            Ok(mut names) => {
                names.sort();
                names
            }
            Err(e) => {
                tracing::warn!("Interface enumeration task failed: {e}");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl InterfaceInventory for SystemInventory {
    async fn list_interfaces(&self) -> Vec<NetworkInterface> {
        let mut interfaces = Vec::new();
        for name in Self::interface_names().await {
            let kind = if self.is_bridge_device(&name) {
                InterfaceKind::Bridge
            } else {
                InterfaceKind::Physical
            };
            let addresses = self.addresses_for(&name).await;
            interfaces.push(NetworkInterface { name, kind, addresses });
        }
        with_synthesized_bridge(interfaces, &self.bridge_name)
    }

    async fn addresses_for(&self, name: &str) -> Vec<String> {
        let cmd = CommandLine::new("ip", ["-o", "-4", "addr", "show", "dev", name]);
        match self.runner.run(&cmd).await {
            Ok(out) if out.success() => parse_ipv4_addresses(&out.stdout),
            Ok(out) => {
                tracing::debug!("No addresses for {name}: {}", out.stderr.trim());
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("Failed to query addresses for {name}: {e}");
                Vec::new()
            }
        }
    }

    async fn has_carrier(&self, name: &str) -> bool {
        let path = self.sysfs_root.join(name).join("carrier");
        // Reading carrier of an administratively-down link fails with EINVAL.
        matches!(tokio::fs::read_to_string(&path).await, Ok(v) if v.trim() == "1")
    }
}

/// Append a bridge entry unless one with `bridge_name` is already listed.
pub fn with_synthesized_bridge(
    mut interfaces: Vec<NetworkInterface>,
    bridge_name: &str,
) -> Vec<NetworkInterface> {
    if !interfaces.iter().any(|i| i.name == bridge_name) {
        interfaces.push(NetworkInterface {
            name: bridge_name.to_string(),
            kind: InterfaceKind::Bridge,
            addresses: Vec::new(),
        });
    }
    interfaces
}

/// Extract addresses from `ip -o -4 addr show` output.
pub fn parse_ipv4_addresses(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            tokens.find(|t| *t == "inet")?;
            let cidr = tokens.next()?;
            Some(cidr.split('/').next().unwrap_or(cidr).to_string())
        })
        .collect()
}
