//! Interface listing and connected-device commands.

use serde::Serialize;

use crate::core::inventory::NetworkInterface;

use super::logic::device_label;
use super::state::AppState;

/// What is plugged into one bridge member port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectedDevice {
    pub interface: String,
    pub addresses: Vec<String>,
    pub label: String,
}

pub async fn list_interfaces(state: &AppState) -> Vec<NetworkInterface> {
    state.inventory.list_interfaces().await
}

/// Addresses on each of the two member ports, queried fresh every call.
pub async fn connected_devices(state: &AppState) -> Vec<ConnectedDevice> {
    let mut devices = Vec::new();
    for interface in state.registry.bridge_state().members {
        let addresses = state.inventory.addresses_for(&interface).await;
        if addresses.is_empty() {
            tracing::warn!("No device connected on {interface}");
        }
        devices.push(ConnectedDevice {
            label: device_label(&addresses),
            interface,
            addresses,
        });
    }
    devices
}
