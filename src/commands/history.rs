//! Backup history commands.

use std::path::PathBuf;

use crate::error::AppError;
use crate::history::BackupFileEntry;

use super::logic::remove_prompt;
use super::state::AppState;

pub fn list_backups(state: &AppState) -> Result<Vec<BackupFileEntry>, AppError> {
    Ok(state.backups.list()?)
}

/// Copy a backup into `dest`, or a folder the user picks when `dest` is
/// `None`. `Ok(None)` when the user cancelled the picker.
pub async fn copy_backup(
    state: &AppState,
    name: &str,
    dest: Option<PathBuf>,
) -> Result<Option<PathBuf>, AppError> {
    let dest = match dest {
        Some(dest) => dest,
        None => match state.confirm.pick_folder("Copy backup to folder").await {
            Some(dest) => dest,
            None => return Ok(None),
        },
    };
    let copied = state.backups.copy_to(name, &dest).map_err(|e| {
        tracing::warn!("Copy of {name} failed: {e}");
        e
    })?;
    Ok(Some(copied))
}

/// Delete a backup after confirmation. `Ok(false)` when declined.
pub async fn remove_backup(state: &AppState, name: &str) -> Result<bool, AppError> {
    if !state.confirm.confirm(&remove_prompt(name)).await {
        return Ok(false);
    }
    state.backups.remove(name).map_err(|e| {
        tracing::warn!("Delete of {name} failed: {e}");
        e
    })?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures::fixture;

    #[tokio::test]
    async fn test_remove_requires_confirmation() {
        let fx = fixture(false);
        std::fs::write(fx.backup_dir.path().join("capture_a.pcap"), b"x").unwrap();

        assert!(!remove_backup(&fx.state, "capture_a.pcap").await.unwrap());
        assert_eq!(list_backups(&fx.state).unwrap().len(), 1);
        assert_eq!(fx.confirm.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_confirmed_deletes() {
        let fx = fixture(true);
        std::fs::write(fx.backup_dir.path().join("capture_a.pcap"), b"x").unwrap();

        assert!(remove_backup(&fx.state, "capture_a.pcap").await.unwrap());
        assert!(list_backups(&fx.state).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_copy_without_destination_and_cancelled_picker() {
        let fx = fixture(true);
        std::fs::write(fx.backup_dir.path().join("capture_a.pcap"), b"x").unwrap();
        assert_eq!(copy_backup(&fx.state, "capture_a.pcap", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_copy_missing_file_is_io_error() {
        let fx = fixture(true);
        let dest = tempfile::tempdir().unwrap();
        let err = copy_backup(&fx.state, "capture_none.pcap", Some(dest.path().to_path_buf()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Io");
    }
}
