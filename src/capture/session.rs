//! One slot's capture session.
//!
//! State machine: `Idle -> Starting -> Running -> Stopping -> Idle`. A start
//! rejected by a precondition falls back from `Starting` to `Idle`. An `Exit`
//! event moves `Running` straight to `Idle`, whether the pipeline ended on
//! request, on a signal from outside, or by crashing.
//!
//! Invariant: `is_running()` iff a process handle is held.

use serde::Serialize;

use super::command::{CaptureCommand, Slot};
use super::spawner::ProcessSpawner;
use super::{ProcessEventKind, ProcessHandle};
use crate::config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Append-only text with a byte budget. Once the budget is exceeded the next
/// append clears everything first; there is no rolling window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBuffer {
    text: String,
    cap: usize,
}

impl OutputBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            text: String::new(),
            cap,
        }
    }

    pub fn append(&mut self, data: &str) {
        if self.text.len() > self.cap {
            self.text.clear();
        }
        self.text.push_str(data);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(config::OUTPUT_BUFFER_CAP)
    }
}

/// Serializable view of a session for the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub slot: Slot,
    pub state: SessionState,
    pub running: bool,
    pub pid: Option<u32>,
    pub interface: Option<String>,
    pub command: Option<String>,
    pub output: String,
    pub last_exit: Option<Option<i32>>,
}

#[derive(Debug)]
pub struct CaptureSession {
    slot: Slot,
    state: SessionState,
    process: Option<ProcessHandle>,
    output: OutputBuffer,
    command: Option<CaptureCommand>,
    last_exit: Option<Option<i32>>,
}

impl CaptureSession {
    pub fn new(slot: Slot) -> Self {
        Self {
            slot,
            state: SessionState::Idle,
            process: None,
            output: OutputBuffer::default(),
            command: None,
            last_exit: None,
        }
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    #[cfg(test)]
    pub fn process(&self) -> Option<ProcessHandle> {
        self.process
    }

    #[cfg(test)]
    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }

    /// The command of the current or most recent run.
    pub fn command(&self) -> Option<&CaptureCommand> {
        self.command.as_ref()
    }

    /// Exit code of the most recent run that ended on its own.
    pub fn last_exit(&self) -> Option<Option<i32>> {
        self.last_exit
    }

    pub fn owns(&self, id: super::ProcessId) -> bool {
        self.process.is_some_and(|p| p.id == id)
    }

    pub(crate) fn begin_start(&mut self) {
        debug_assert!(self.process.is_none());
        self.state = SessionState::Starting;
    }

    /// A start that failed its preconditions leaves the session idle.
    pub(crate) fn abort_start(&mut self) {
        self.state = SessionState::Idle;
    }

    pub(crate) fn mark_running(&mut self, handle: ProcessHandle, command: CaptureCommand) {
        self.output.append(&format!("{} >>>> \n", command.display()));
        self.process = Some(handle);
        self.command = Some(command);
        self.last_exit = None;
        self.state = SessionState::Running;
        tracing::info!("[{}] capture running (pid {}, {})", self.slot, handle.pid, handle.id);
    }

    /// Signal the pipeline and go idle without waiting for it to die.
    /// Returns the released handle, or `None` when nothing was running.
    pub async fn stop(&mut self, spawner: &dyn ProcessSpawner) -> Option<ProcessHandle> {
        let handle = self.process?;
        self.state = SessionState::Stopping;
        if let Err(e) = spawner.terminate(&handle).await {
            tracing::warn!("[{}] failed to signal pid {}: {e}", self.slot, handle.pid);
        }
        self.process = None;
        self.state = SessionState::Idle;
        tracing::info!("[{}] capture stopped (pid {})", self.slot, handle.pid);
        Some(handle)
    }

    /// Apply one event from the owned pipeline. Returns `true` for the
    /// terminal `Exit` event.
    pub fn on_event(&mut self, kind: &ProcessEventKind) -> bool {
        match kind {
            ProcessEventKind::Stdout(data) | ProcessEventKind::Stderr(data) => {
                self.output.append(data);
                false
            }
            ProcessEventKind::Exit(code) => {
                match code {
                    Some(code) => self.output.append(&format!("exit code: {code}\n")),
                    None => self.output.append("terminated by signal\n"),
                }
                if *code != Some(0) {
                    tracing::warn!("[{}] capture exited unexpectedly: {code:?}", self.slot);
                }
                self.process = None;
                self.last_exit = Some(*code);
                self.state = SessionState::Idle;
                true
            }
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            slot: self.slot,
            state: self.state,
            running: self.is_running(),
            pid: self.process.map(|p| p.pid),
            interface: self.command.as_ref().map(|c| c.interface.clone()),
            command: self.command.as_ref().map(CaptureCommand::display),
            output: self.output.as_str().to_string(),
            last_exit: self.last_exit,
        }
    }
}
