//! Capture session registry.
//!
//! Owns every slot's session, the bridge controller and the event
//! multiplexer. All capture operations go through here, on one task, so no
//! locking is needed. The registry is the only place that knows which
//! sessions depend on the bridge, and so the only place that decides when the
//! bridge can go away.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use super::command::{timestamp_now, CaptureCommand, Slot};
use super::filter::{CaptureFilter, FilterError};
use super::mux::{EventMultiplexer, Routed};
use super::session::{CaptureSession, SessionStatus};
use super::spawner::ProcessSpawner;
use super::{ProcessEvent, ProcessHandle, ProcessId};
use crate::config::Settings;
use crate::core::bridge::{BridgeController, BridgeError, BridgeOutcome, BridgeState};
use crate::core::inventory::InterfaceInventory;

/// A start refused before anything was spawned. The session stays idle and
/// the user can retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionFailure {
    #[error("no device connected on {interface}")]
    NoDevice { interface: String },

    #[error("bridge setup was declined")]
    BridgeDeclined,

    #[error("{interface} is a member of active bridge {bridge}; capture on {bridge} or tear it down first")]
    InterfaceBridged { interface: String, bridge: String },

    #[error("{interface} is being captured on its own; stop that capture before bridging it into {bridge}")]
    MemberCaptured { interface: String, bridge: String },
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error(transparent)]
    Precondition(#[from] PreconditionFailure),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),

    #[error("output directory {} is the backup directory", .0.display())]
    OutputIsBackup(PathBuf),

    #[error("failed to start capture: {0}")]
    Spawn(#[source] std::io::Error),
}

impl CaptureError {
    pub fn is_permission_denied(&self) -> bool {
        match self {
            CaptureError::PermissionDenied(_) => true,
            CaptureError::Bridge(e) => e.is_permission_denied(),
            _ => false,
        }
    }
}

/// Form state for one start request. Missing fields fall back to the slot's
/// defaults from `Settings`.
#[derive(Debug, Clone, Default)]
pub struct CaptureParams {
    pub interface: Option<String>,
    pub filter: Option<CaptureFilter>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ToggleOutcome {
    Started {
        slot: Slot,
        id: ProcessId,
        pid: u32,
        command: String,
    },
    Stopped {
        slot: Slot,
        pid: u32,
        /// Set when stopping released the bridge's last dependent.
        bridge: Option<BridgeOutcome>,
    },
}

pub struct CaptureRegistry {
    sessions: BTreeMap<Slot, CaptureSession>,
    bridge: BridgeController,
    inventory: Arc<dyn InterfaceInventory>,
    spawner: Arc<dyn ProcessSpawner>,
    mux: EventMultiplexer,
    settings: Settings,
    next_id: u64,
    /// Stopped pipelines whose exit has not arrived yet.
    draining: HashMap<ProcessId, Slot>,
    /// Slots currently capturing on the bridge device.
    bridge_dependents: BTreeSet<Slot>,
    /// Physical interface most recently captured on, restored after teardown.
    last_physical: Option<String>,
    /// The last dependent exited on its own; teardown waits for `release_idle_bridge`.
    teardown_pending: bool,
}

impl CaptureRegistry {
    pub fn new(
        settings: Settings,
        bridge: BridgeController,
        inventory: Arc<dyn InterfaceInventory>,
        spawner: Arc<dyn ProcessSpawner>,
    ) -> Self {
        let mut mux = EventMultiplexer::new();
        mux.ensure_subscribed();
        Self {
            sessions: Slot::ALL.iter().map(|&s| (s, CaptureSession::new(s))).collect(),
            bridge,
            inventory,
            spawner,
            mux,
            settings,
            next_id: 0,
            draining: HashMap::new(),
            bridge_dependents: BTreeSet::new(),
            last_physical: None,
            teardown_pending: false,
        }
    }

    /// Start the slot, or stop it if it is already running.
    pub async fn toggle(
        &mut self,
        slot: Slot,
        params: CaptureParams,
    ) -> Result<ToggleOutcome, CaptureError> {
        if self.session_mut(slot).is_running() {
            if let Some(stopped) = self.stop(slot).await? {
                return Ok(stopped);
            }
        }

        self.session_mut(slot).begin_start();
        match self.start(slot, params).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.session_mut(slot).abort_start();
                tracing::warn!("[{slot}] capture not started: {e}");
                Err(e)
            }
        }
    }

    async fn start(
        &mut self,
        slot: Slot,
        params: CaptureParams,
    ) -> Result<ToggleOutcome, CaptureError> {
        let interface = params
            .interface
            .filter(|i| !i.trim().is_empty())
            .unwrap_or_else(|| self.default_interface(slot));
        let on_bridge = interface == self.bridge.name();

        let output_dir = params
            .output_dir
            .unwrap_or_else(|| self.settings.default_output_dir.clone());
        if same_dir(&output_dir, &self.settings.backup_dir) {
            return Err(CaptureError::OutputIsBackup(output_dir));
        }
        if on_bridge {
            if let Some(member) = self.captured_member() {
                return Err(PreconditionFailure::MemberCaptured {
                    interface: member,
                    bridge: self.bridge.name().to_string(),
                }
                .into());
            }
        }
        if !on_bridge && self.bridge.is_active() && self.bridge.is_member(&interface) {
            return Err(PreconditionFailure::InterfaceBridged {
                interface,
                bridge: self.bridge.name().to_string(),
            }
            .into());
        }
        if on_bridge && self.bridge.setup().await? == BridgeOutcome::Cancelled {
            return Err(PreconditionFailure::BridgeDeclined.into());
        }
        self.ensure_connected(&interface, on_bridge).await?;

        let command = CaptureCommand {
            interface: interface.clone(),
            filter: params.filter,
            output_dir,
            backup_dir: self.settings.backup_dir.clone(),
            timestamp: timestamp_now(),
            rotation_size_mb: slot.rotation_mb(),
            tool: self.settings.capture_tool.clone(),
            elevate: self.settings.use_sudo,
        };
        tracing::debug!("[{slot}] spawning: {}", command.display());

        self.next_id += 1;
        let id = ProcessId(self.next_id);
        let pid = self
            .spawner
            .spawn(id, &command.stages(), self.mux.sender())
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => CaptureError::PermissionDenied(e.to_string()),
                _ => CaptureError::Spawn(e),
            })?;

        // Already subscribed at construction; this never adds a second listener.
        self.mux.ensure_subscribed();

        let display = command.display();
        self.session_mut(slot)
            .mark_running(ProcessHandle { id, pid }, command);
        if on_bridge {
            self.bridge_dependents.insert(slot);
        } else {
            self.last_physical = Some(interface);
        }
        Ok(ToggleOutcome::Started {
            slot,
            id,
            pid,
            command: display,
        })
    }

    /// A bridge member some running session captures on directly.
    fn captured_member(&self) -> Option<String> {
        self.sessions
            .values()
            .filter(|s| s.is_running())
            .filter_map(CaptureSession::command)
            .map(|c| c.interface.as_str())
            .find(|i| self.bridge.is_member(i))
            .map(str::to_string)
    }

    /// A bridge target is connected when both members have carrier; a
    /// physical one when it has an IPv4 address.
    async fn ensure_connected(&self, interface: &str, on_bridge: bool) -> Result<(), PreconditionFailure> {
        if on_bridge {
            for member in self.bridge.members() {
                if !self.inventory.has_carrier(member).await {
                    return Err(PreconditionFailure::NoDevice {
                        interface: member.clone(),
                    });
                }
            }
            return Ok(());
        }
        if self.inventory.addresses_for(interface).await.is_empty() {
            return Err(PreconditionFailure::NoDevice {
                interface: interface.to_string(),
            });
        }
        Ok(())
    }

    /// Stop the slot. When it was the bridge's last dependent the bridge is
    /// torn down after confirmation. `None` when the slot was idle.
    pub async fn stop(&mut self, slot: Slot) -> Result<Option<ToggleOutcome>, CaptureError> {
        let Some(handle) = self.halt(slot).await else {
            return Ok(None);
        };
        let bridge = if self.bridge_dependents.remove(&slot) && self.bridge_dependents.is_empty() {
            Some(self.bridge.teardown(self.last_physical.as_deref()).await?)
        } else {
            None
        };
        Ok(Some(ToggleOutcome::Stopped {
            slot,
            pid: handle.pid,
            bridge,
        }))
    }

    /// Stop every session, then remove the bridge. With `confirm_teardown`
    /// unset the caller has already asked the user. Returns how many sessions
    /// were stopped.
    pub async fn stop_all(&mut self, confirm_teardown: bool) -> Result<usize, CaptureError> {
        let mut stopped = 0;
        for slot in Slot::ALL {
            if self.halt(slot).await.is_some() {
                stopped += 1;
            }
        }
        self.bridge_dependents.clear();
        self.teardown_pending = false;
        tracing::info!("Stopped {stopped} capture session(s)");

        if self.bridge.is_active() {
            let restore = self.last_physical.clone();
            let outcome = if confirm_teardown {
                self.bridge.teardown(restore.as_deref()).await?
            } else {
                self.bridge.force_teardown(restore.as_deref()).await?
            };
            tracing::debug!("Bridge after stop-all: {outcome:?}");
        }
        Ok(stopped)
    }

    /// Signal the slot's pipeline and track it until its exit arrives.
    async fn halt(&mut self, slot: Slot) -> Option<ProcessHandle> {
        let spawner = Arc::clone(&self.spawner);
        let handle = self.session_mut(slot).stop(spawner.as_ref()).await?;
        if spawner.is_alive(handle.id) {
            self.draining.insert(handle.id, slot);
        }
        Some(handle)
    }

    /// Route one pipeline event to its session.
    pub fn dispatch(&mut self, event: &ProcessEvent) -> Routed {
        let routed = EventMultiplexer::route(self.sessions.values_mut(), event);
        match &routed {
            Routed::Exited { slot, code } => {
                tracing::info!("[{slot}] capture ended with {code:?}");
                if self.bridge_dependents.remove(slot)
                    && self.bridge_dependents.is_empty()
                    && self.bridge.is_active()
                {
                    self.teardown_pending = true;
                }
            }
            Routed::Dropped { id, was_exit: true } => match self.draining.remove(id) {
                Some(slot) => tracing::debug!("[{slot}] stopped pipeline {id} has exited"),
                None => tracing::debug!("Dropped exit for unknown pipeline {id}"),
            },
            Routed::Dropped { id, .. } => {
                tracing::debug!("Dropped stale output from pipeline {id}");
            }
            Routed::Output(_) => {}
        }
        routed
    }

    /// Wait for the next pipeline event. Cancel safe.
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        self.mux.recv().await
    }

    /// Dispatch every event already queued. Returns how many were handled.
    #[cfg(test)]
    pub fn pump_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.mux.try_recv() {
            self.dispatch(&event);
            handled += 1;
        }
        handled
    }

    /// Offer to tear the bridge down once its last dependent has exited on
    /// its own. `None` when nothing is pending or a new dependent started
    /// in the meantime.
    pub async fn release_idle_bridge(&mut self) -> Result<Option<BridgeOutcome>, CaptureError> {
        if !std::mem::take(&mut self.teardown_pending) || !self.bridge_dependents.is_empty() {
            return Ok(None);
        }
        let restore = self.last_physical.clone();
        Ok(Some(self.bridge.teardown(restore.as_deref()).await?))
    }

    /// Tear the bridge down on request. Refused as `InUse` while any session
    /// still captures on it.
    pub async fn teardown_bridge(
        &mut self,
        restore: Option<&str>,
    ) -> Result<BridgeOutcome, CaptureError> {
        if !self.bridge_dependents.is_empty() {
            tracing::info!(
                "Bridge {} still used by {:?}",
                self.bridge.name(),
                self.bridge_dependents
            );
            return Ok(BridgeOutcome::InUse);
        }
        let restore = restore.or(self.last_physical.as_deref());
        Ok(self.bridge.teardown(restore).await?)
    }

    pub async fn setup_bridge(&mut self) -> Result<BridgeOutcome, CaptureError> {
        Ok(self.bridge.setup().await?)
    }

    pub async fn probe_bridge(&mut self) -> bool {
        self.bridge.probe().await
    }

    pub fn bridge_state(&self) -> BridgeState {
        self.bridge.state()
    }

    pub fn any_running(&self) -> bool {
        self.sessions.values().any(CaptureSession::is_running)
    }

    #[cfg(test)]
    pub fn session(&self, slot: Slot) -> Option<&CaptureSession> {
        self.sessions.get(&slot)
    }

    pub fn statuses(&self) -> Vec<SessionStatus> {
        self.sessions.values().map(CaptureSession::status).collect()
    }

    /// Pipelines that were told to stop but have not exited yet.
    pub fn draining_count(&self) -> usize {
        self.draining.len()
    }

    #[cfg(test)]
    fn is_subscribed(&self) -> bool {
        self.mux.is_subscribed()
    }

    fn default_interface(&self, slot: Slot) -> String {
        match slot {
            Slot::Primary => self.settings.primary_interface.clone(),
            Slot::Secondary => self.settings.secondary_interface.clone(),
            Slot::Bridge => self.bridge.name().to_string(),
        }
    }

    fn session_mut(&mut self, slot: Slot) -> &mut CaptureSession {
        self.sessions
            .entry(slot)
            .or_insert_with(|| CaptureSession::new(slot))
    }
}

/// Whether two paths name the same directory. Falls back to comparing the
/// paths as written when either does not exist yet.
fn same_dir(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
