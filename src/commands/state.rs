//! Shared application state owned by the control loop.

use std::sync::Arc;

use crate::capture::CaptureRegistry;
use crate::core::confirm::Confirm;
use crate::core::inventory::InterfaceInventory;
use crate::history::BackupStore;

/// Everything command handlers operate on. Owned by the single control task,
/// so handlers take `&mut AppState` and no field needs a lock.
pub struct AppState {
    pub registry: CaptureRegistry,
    pub inventory: Arc<dyn InterfaceInventory>,
    pub backups: BackupStore,
    /// Dialogs for warnings and destructive actions.
    pub confirm: Arc<dyn Confirm>,
}
