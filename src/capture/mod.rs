//! Capture subsystem: per-slot sessions running an external capture pipeline.
//!
//! - [`command`]: slots and the immutable `CaptureCommand` a session runs
//! - [`filter`]: allow-listed capture filter expressions
//! - [`session`]: one slot's session state machine and output buffer
//! - [`mux`]: the single process-event subscription, demultiplexed by identity
//! - [`spawner`]: pipeline spawning, output streaming and signal delivery
//! - [`registry`]: fixed slot set, toggle semantics, bridge sequencing

pub mod command;
pub mod filter;
pub mod mux;
pub mod registry;
pub mod session;
pub mod spawner;

use serde::Serialize;

pub use command::Slot;
pub use filter::{CaptureFilter, FilterError, FilterFields};
pub use registry::{CaptureError, CaptureParams, CaptureRegistry, ToggleOutcome};
pub use session::SessionStatus;
pub use spawner::PipelineSpawner;

#[cfg(test)]
pub use command::CaptureCommand;
#[cfg(test)]
pub use registry::PreconditionFailure;
#[cfg(test)]
pub use session::SessionState;
#[cfg(test)]
pub use spawner::ProcessSpawner;

/// Identity of one spawned pipeline. Allocated by the registry, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProcessId(pub u64);

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A running pipeline as seen by its owning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessHandle {
    pub id: ProcessId,
    /// OS pid of the first stage; also the pipeline's process group id.
    pub pid: u32,
}

/// One event from a spawned pipeline. For a given id, `Exit` is always last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEvent {
    pub id: ProcessId,
    pub kind: ProcessEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEventKind {
    Stdout(String),
    Stderr(String),
    /// Exit code of the pipeline; `None` when it was ended by a signal.
    Exit(Option<i32>),
}

impl ProcessEvent {
    #[cfg(test)]
    pub fn stdout(id: ProcessId, data: impl Into<String>) -> Self {
        Self {
            id,
            kind: ProcessEventKind::Stdout(data.into()),
        }
    }

    #[cfg(test)]
    pub fn stderr(id: ProcessId, data: impl Into<String>) -> Self {
        Self {
            id,
            kind: ProcessEventKind::Stderr(data.into()),
        }
    }

    pub fn exit(id: ProcessId, code: Option<i32>) -> Self {
        Self {
            id,
            kind: ProcessEventKind::Exit(code),
        }
    }

    pub fn is_exit(&self) -> bool {
        matches!(self.kind, ProcessEventKind::Exit(_))
    }
}
