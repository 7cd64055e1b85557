//! One-shot OS command execution.
//!
//! Commands are built as structured argv, never as shell strings. The
//! `CommandRunner` trait is the seam the bridge controller and interface
//! inventory run through, so both can be exercised without touching the host.

use async_trait::async_trait;

/// Captured result of a finished one-shot command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Whether a failed command was rejected for lack of privileges.
    pub fn is_permission_denied(&self) -> bool {
        !self.success() && mentions_permission_denied(&self.stderr)
    }
}

/// A command line as program plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Prefix the command with `sudo` when `elevate` is set.
    pub fn elevated(self, elevate: bool) -> Self {
        if !elevate {
            return self;
        }
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: "sudo".into(),
            args,
        }
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Runs a command to completion and captures its output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &CommandLine) -> std::io::Result<CommandOutput>;
}

/// Runs commands on the host with `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &CommandLine) -> std::io::Result<CommandOutput> {
        tracing::debug!("exec: {command}");
        let output = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}

/// Recognize the messages `ip`, `iptables`, `sysctl` and `sudo` print when
/// the caller lacks privileges.
pub fn mentions_permission_denied(stderr: &str) -> bool {
    const MARKERS: [&str; 5] = [
        "operation not permitted",
        "permission denied",
        "must be root",
        "a password is required",
        "you must be root",
    ];
    let lower = stderr.to_ascii_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}
