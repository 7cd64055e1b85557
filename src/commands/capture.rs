//! Capture session and bridge commands.

use crate::capture::{SessionStatus, Slot, ToggleOutcome};
use crate::core::bridge::{BridgeOutcome, BridgeState};
use crate::error::AppError;

use super::logic::{build_capture_params, CaptureRequest};
use super::state::AppState;

/// Start the slot's capture from form state, or stop it if running.
/// Refused starts are also shown to the user as a warning.
pub async fn toggle_capture(
    state: &mut AppState,
    slot: Slot,
    request: CaptureRequest,
) -> Result<ToggleOutcome, AppError> {
    let params = build_capture_params(request)?;
    match state.registry.toggle(slot, params).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            let err = AppError::from(e);
            match &err {
                AppError::Precondition(msg) => {
                    state.confirm.warn("Capture not started", msg).await;
                }
                AppError::Permission(msg) => {
                    state
                        .confirm
                        .warn("Permission denied", &format!("{msg}. Re-run with elevated privileges."))
                        .await;
                }
                _ => {}
            }
            Err(err)
        }
    }
}

pub async fn stop_capture(
    state: &mut AppState,
    slot: Slot,
) -> Result<Option<ToggleOutcome>, AppError> {
    Ok(state.registry.stop(slot).await?)
}

/// Returns how many sessions were stopped. `confirm_teardown` is unset only
/// when the user already agreed to quit.
pub async fn stop_all_captures(
    state: &mut AppState,
    confirm_teardown: bool,
) -> Result<usize, AppError> {
    Ok(state.registry.stop_all(confirm_teardown).await?)
}

/// Offer bridge teardown after its last dependent ended on its own.
pub async fn release_idle_bridge(state: &mut AppState) -> Result<Option<BridgeOutcome>, AppError> {
    Ok(state.registry.release_idle_bridge().await?)
}

pub fn capture_status(state: &AppState) -> Vec<SessionStatus> {
    state.registry.statuses()
}

pub fn any_running(state: &AppState) -> bool {
    state.registry.any_running()
}

pub async fn setup_bridge(state: &mut AppState) -> Result<BridgeOutcome, AppError> {
    Ok(state.registry.setup_bridge().await?)
}

pub async fn teardown_bridge(
    state: &mut AppState,
    restore: Option<String>,
) -> Result<BridgeOutcome, AppError> {
    Ok(state.registry.teardown_bridge(restore.as_deref()).await?)
}

pub fn bridge_state(state: &AppState) -> BridgeState {
    state.registry.bridge_state()
}
