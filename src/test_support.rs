//! Scripted stand-ins for the OS-facing seams, shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::capture::{CaptureCommand, ProcessEvent, ProcessEventKind, ProcessHandle, ProcessId, Slot};
use crate::core::confirm::{Confirm, Prompt};
use crate::core::inventory::{InterfaceInventory, InterfaceKind, NetworkInterface};
use crate::core::runner::{CommandLine, CommandOutput, CommandRunner};

enum Reply {
    Respond(String),
    Fail(String),
    Deny,
}

/// Records every command. The first rule whose pattern is a substring of the
/// rendered command decides the result; unmatched commands succeed silently.
#[derive(Default)]
pub struct FakeRunner {
    rules: Mutex<Vec<(String, Reply)>>,
    commands: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn respond_matching(&self, pattern: &str, stdout: &str) {
        self.push(pattern, Reply::Respond(stdout.into()));
    }

    pub fn fail_matching(&self, pattern: &str, stderr: &str) {
        self.push(pattern, Reply::Fail(stderr.into()));
    }

    pub fn deny_matching(&self, pattern: &str) {
        self.push(pattern, Reply::Deny);
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn push(&self, pattern: &str, reply: Reply) {
        self.rules.lock().unwrap().push((pattern.into(), reply));
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, command: &CommandLine) -> std::io::Result<CommandOutput> {
        let rendered = command.to_string();
        self.commands.lock().unwrap().push(rendered.clone());

        let rules = self.rules.lock().unwrap();
        let reply = rules.iter().find(|(p, _)| rendered.contains(p.as_str())).map(|(_, r)| r);
        Ok(match reply {
            Some(Reply::Respond(stdout)) => CommandOutput {
                stdout: stdout.clone(),
                stderr: String::new(),
                exit_code: Some(0),
            },
            Some(Reply::Fail(stderr)) => CommandOutput {
                stdout: String::new(),
                stderr: stderr.clone(),
                exit_code: Some(1),
            },
            Some(Reply::Deny) => CommandOutput {
                stdout: String::new(),
                stderr: "Operation not permitted".into(),
                exit_code: Some(1),
            },
            None => CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: Some(0),
            },
        })
    }
}

/// Gives the same answer to every prompt and remembers what was asked.
pub struct ScriptedConfirm {
    answer: bool,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedConfirm {
    pub fn always(answer: bool) -> Self {
        Self {
            answer,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Confirm for ScriptedConfirm {
    async fn confirm(&self, prompt: &Prompt) -> bool {
        self.prompts.lock().unwrap().push(prompt.clone());
        self.answer
    }
}

/// In-memory interface table.
#[derive(Default)]
pub struct FakeInventory {
    addresses: HashMap<String, Vec<String>>,
    carrier: HashSet<String>,
}

impl FakeInventory {
    pub fn with_address(mut self, name: &str, address: &str) -> Self {
        self.addresses.entry(name.into()).or_default().push(address.into());
        self
    }

    pub fn with_carrier(mut self, name: &str) -> Self {
        self.carrier.insert(name.into());
        self
    }
}

#[async_trait]
impl InterfaceInventory for FakeInventory {
    async fn list_interfaces(&self) -> Vec<NetworkInterface> {
        let mut names: Vec<&String> = self.addresses.keys().chain(self.carrier.iter()).collect();
        names.sort();
        names.dedup();
        names
            .into_iter()
            .map(|name| NetworkInterface {
                name: name.clone(),
                kind: InterfaceKind::Physical,
                addresses: self.addresses.get(name).cloned().unwrap_or_default(),
            })
            .collect()
    }

    async fn addresses_for(&self, name: &str) -> Vec<String> {
        self.addresses.get(name).cloned().unwrap_or_default()
    }

    async fn has_carrier(&self, name: &str) -> bool {
        self.carrier.contains(name)
    }
}

/// Records spawns and signals. Pipelines stay alive until `finish` sends
/// their exit event.
#[derive(Default)]
pub struct FakeSpawner {
    spawned: Mutex<Vec<(ProcessId, Vec<CommandLine>)>>,
    senders: Mutex<HashMap<ProcessId, UnboundedSender<ProcessEvent>>>,
    exited: Mutex<HashSet<ProcessId>>,
    terminated: Mutex<Vec<u32>>,
    spawn_error: Mutex<Option<std::io::ErrorKind>>,
    terminate_fails: Mutex<bool>,
}

impl FakeSpawner {
    pub fn fail_spawn(&self, kind: std::io::ErrorKind) {
        *self.spawn_error.lock().unwrap() = Some(kind);
    }

    pub fn fail_terminate(&self) {
        *self.terminate_fails.lock().unwrap() = true;
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    pub fn last_stages(&self) -> Vec<CommandLine> {
        self.spawned
            .lock()
            .unwrap()
            .last()
            .map(|(_, stages)| stages.clone())
            .unwrap_or_default()
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.terminated.lock().unwrap().clone()
    }

    pub fn emit_stdout(&self, id: ProcessId, data: &str) {
        self.send(id, ProcessEventKind::Stdout(data.into()));
    }

    /// Deliver the pipeline's exit; it is no longer alive afterwards.
    /// Later `emit_*` calls still send, like a misbehaving source would.
    pub fn finish(&self, id: ProcessId, code: Option<i32>) {
        self.send(id, ProcessEventKind::Exit(code));
        self.exited.lock().unwrap().insert(id);
    }

    fn send(&self, id: ProcessId, kind: ProcessEventKind) {
        if let Some(tx) = self.senders.lock().unwrap().get(&id) {
            tx.send(ProcessEvent { id, kind }).unwrap();
        }
    }
}

#[async_trait]
impl crate::capture::ProcessSpawner for FakeSpawner {
    async fn spawn(
        &self,
        id: ProcessId,
        stages: &[CommandLine],
        events: UnboundedSender<ProcessEvent>,
    ) -> std::io::Result<u32> {
        if let Some(kind) = *self.spawn_error.lock().unwrap() {
            return Err(std::io::Error::new(kind, "scripted spawn failure"));
        }
        self.spawned.lock().unwrap().push((id, stages.to_vec()));
        self.senders.lock().unwrap().insert(id, events);
        Ok(1000 + id.0 as u32)
    }

    async fn terminate(&self, handle: &ProcessHandle) -> std::io::Result<()> {
        self.terminated.lock().unwrap().push(handle.pid);
        if *self.terminate_fails.lock().unwrap() {
            return Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        }
        Ok(())
    }

    fn is_alive(&self, id: ProcessId) -> bool {
        self.senders.lock().unwrap().contains_key(&id) && !self.exited.lock().unwrap().contains(&id)
    }
}

/// A fixed, unelevated primary-slot command on `interface`.
pub fn sample_command(interface: &str) -> CaptureCommand {
    CaptureCommand {
        interface: interface.into(),
        filter: None,
        output_dir: PathBuf::from("/out"),
        backup_dir: PathBuf::from("../backup"),
        timestamp: "2024-01-01-00-00-00".into(),
        rotation_size_mb: Slot::Primary.rotation_mb(),
        tool: "tcpdump".into(),
        elevate: false,
    }
}
