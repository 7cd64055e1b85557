//! Line-oriented stand-in UI on stdin/stdout.
//!
//! One reader task turns stdin into a channel of lines. The control loop and
//! the dialogs share that channel, so a confirmation question consumes the
//! next line the user types instead of racing the command prompt for it.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};

use crate::core::confirm::{ButtonSet, Confirm, Prompt};

/// Lines read from stdin. `None` from the receiver means stdin closed.
pub type ConsoleInput = Arc<Mutex<mpsc::Receiver<String>>>;

pub fn spawn_stdin_reader() -> ConsoleInput {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Reading stdin failed: {e}");
                    break;
                }
            }
        }
        tracing::debug!("stdin closed");
    });
    Arc::new(Mutex::new(rx))
}

/// Print without a trailing newline and flush, for prompts.
pub fn prompt_line(text: &str) {
    print!("{text}");
    let _ = std::io::stdout().flush();
}

/// Whether `answer` accepts a prompt offering `buttons`. Anything that is not
/// an explicit yes/ok counts as a refusal.
pub fn accepts(buttons: ButtonSet, answer: &str) -> bool {
    let answer = answer.trim().to_ascii_lowercase();
    match buttons {
        ButtonSet::OkCancel => matches!(answer.as_str(), "ok" | "o" | "y" | "yes"),
        ButtonSet::YesNoCancel => matches!(answer.as_str(), "yes" | "y"),
    }
}

fn choices(buttons: ButtonSet) -> &'static str {
    match buttons {
        ButtonSet::OkCancel => "[ok/cancel]",
        ButtonSet::YesNoCancel => "[yes/no/cancel]",
    }
}

/// Dialogs answered on the console.
pub struct ConsoleConfirm {
    input: ConsoleInput,
}

impl ConsoleConfirm {
    pub fn new(input: ConsoleInput) -> Self {
        Self { input }
    }

    async fn read_answer(&self) -> Option<String> {
        self.input.lock().await.recv().await
    }
}

#[async_trait]
impl Confirm for ConsoleConfirm {
    async fn confirm(&self, prompt: &Prompt) -> bool {
        prompt_line(&format!(
            "{}: {} {} ",
            prompt.title,
            prompt.message,
            choices(prompt.buttons)
        ));
        let answer = self.read_answer().await.unwrap_or_default();
        accepts(prompt.buttons, &answer)
    }

    async fn warn(&self, title: &str, message: &str) {
        tracing::warn!("{title}: {message}");
        println!("! {title}: {message}");
    }

    async fn pick_folder(&self, title: &str) -> Option<PathBuf> {
        prompt_line(&format!("{title} (blank to cancel): "));
        let answer = self.read_answer().await?;
        let answer = answer.trim();
        (!answer.is_empty()).then(|| PathBuf::from(answer))
    }
}
