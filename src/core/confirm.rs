//! User-interaction seam: confirmations for destructive or privileged
//! actions, warnings, and the folder picker.

use std::path::PathBuf;

use async_trait::async_trait;

/// Buttons offered by a confirmation dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonSet {
    OkCancel,
    YesNoCancel,
}

/// A confirmation request shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub title: String,
    pub message: String,
    pub buttons: ButtonSet,
}

impl Prompt {
    pub fn new(title: impl Into<String>, message: impl Into<String>, buttons: ButtonSet) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            buttons,
        }
    }
}

/// Asks the user to confirm. `false` covers both "no" and "cancel".
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, prompt: &Prompt) -> bool;

    /// Show a non-blocking warning. Defaults to a log line.
    async fn warn(&self, title: &str, message: &str) {
        tracing::warn!("{title}: {message}");
    }

    /// Ask for a folder. `None` when the user cancels.
    async fn pick_folder(&self, _title: &str) -> Option<PathBuf> {
        None
    }
}
