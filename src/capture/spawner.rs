//! Pipeline spawning and signal delivery.
//!
//! `PipelineSpawner` starts each stage as its own child, wires stdout of one
//! stage into stdin of the next, and puts every stage in the process group of
//! the first. One supervisor task per pipeline forwards the last stage's
//! stdout and every stage's stderr as events, waits for all stages, then
//! emits `Exit`. Since a single task emits everything for a pipeline, events
//! stay in order and `Exit` is always last.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, UnboundedSender};

use super::{ProcessEvent, ProcessEventKind, ProcessHandle, ProcessId};
use crate::core::runner::CommandLine;

#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    /// Start `stages` as one pipeline reporting under `id`. Returns the pid of
    /// the first stage.
    async fn spawn(
        &self,
        id: ProcessId,
        stages: &[CommandLine],
        events: UnboundedSender<ProcessEvent>,
    ) -> std::io::Result<u32>;

    /// Ask the pipeline to terminate. Does not wait for it to exit.
    async fn terminate(&self, handle: &ProcessHandle) -> std::io::Result<()>;

    /// Whether the pipeline has not reported its exit yet.
    fn is_alive(&self, id: ProcessId) -> bool;
}

/// Spawns real pipelines with `tokio::process`.
#[derive(Default)]
pub struct PipelineSpawner {
    live: Arc<DashMap<ProcessId, u32>>,
}

impl PipelineSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Signal every pipeline that has not exited yet.
    pub fn terminate_all(&self) {
        for entry in self.live.iter() {
            let (id, pid) = (*entry.key(), *entry.value());
            if let Err(e) = signal_group(pid) {
                tracing::warn!("Failed to signal pipeline {id} (pid {pid}): {e}");
            }
        }
    }
}

#[async_trait]
impl ProcessSpawner for PipelineSpawner {
    async fn spawn(
        &self,
        id: ProcessId,
        stages: &[CommandLine],
        events: UnboundedSender<ProcessEvent>,
    ) -> std::io::Result<u32> {
        let mut children = spawn_stages(stages)?;
        let leader = children
            .first()
            .and_then(Child::id)
            .ok_or_else(|| std::io::Error::other("pipeline exited before it was tracked"))?;

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<ProcessEventKind>();
        for child in children.iter_mut() {
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(forward_lines(stderr, ProcessEventKind::Stderr, line_tx.clone()));
            }
        }
        if let Some(stdout) = children.last_mut().and_then(|c| c.stdout.take()) {
            tokio::spawn(forward_lines(stdout, ProcessEventKind::Stdout, line_tx.clone()));
        }
        drop(line_tx);

        self.live.insert(id, leader);
        let live = Arc::clone(&self.live);
        tokio::spawn(async move {
            // Ends once every stream reached EOF.
            while let Some(kind) = line_rx.recv().await {
                let _ = events.send(ProcessEvent { id, kind });
            }
            let code = wait_all(&mut children).await;
            live.remove(&id);
            tracing::debug!("Pipeline {id} (pid {leader}) exited with {code:?}");
            let _ = events.send(ProcessEvent::exit(id, code));
        });

        tracing::debug!("Pipeline {id} spawned with leader pid {leader}");
        Ok(leader)
    }

    async fn terminate(&self, handle: &ProcessHandle) -> std::io::Result<()> {
        if !self.live.contains_key(&handle.id) {
            return Ok(());
        }
        signal_group(handle.pid)
    }

    fn is_alive(&self, id: ProcessId) -> bool {
        self.live.contains_key(&id)
    }
}

fn spawn_stages(stages: &[CommandLine]) -> std::io::Result<Vec<Child>> {
    let mut children: Vec<Child> = Vec::with_capacity(stages.len());
    let mut upstream: Option<Stdio> = None;
    let mut leader: Option<u32> = None;

    for (i, stage) in stages.iter().enumerate() {
        let mut cmd = Command::new(&stage.program);
        cmd.args(&stage.args)
            .stdin(upstream.take().unwrap_or_else(Stdio::null))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(leader.map_or(0, |pid| pid as i32));

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                for started in children.iter_mut() {
                    let _ = started.start_kill();
                }
                return Err(e);
            }
        };
        if leader.is_none() {
            leader = child.id();
        }
        if i + 1 < stages.len() {
            if let Some(stdout) = child.stdout.take() {
                upstream = Some(stdout.try_into()?);
            }
        }
        children.push(child);
    }
    Ok(children)
}

/// Forward a stream as events, one per line. Invalid UTF-8 is replaced.
async fn forward_lines<R>(
    stream: R,
    wrap: fn(String) -> ProcessEventKind,
    tx: UnboundedSender<ProcessEventKind>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(wrap(line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("Error reading pipeline output: {e}");
                break;
            }
        }
    }
}

/// Wait for every stage. The pipeline's code is the first failing stage's
/// code (`None` if that stage died from a signal), or 0.
async fn wait_all(children: &mut [Child]) -> Option<i32> {
    let mut result = Some(0);
    let mut failed = false;
    for child in children.iter_mut() {
        match child.wait().await {
            Ok(status) if !status.success() && !failed => {
                failed = true;
                result = status.code();
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to wait for pipeline stage: {e}"),
        }
    }
    result
}

#[cfg(unix)]
fn signal_group(pid: u32) -> std::io::Result<()> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    killpg(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))
}

#[cfg(not(unix))]
fn signal_group(pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("cannot signal process group {pid} on this platform"),
    ))
}
