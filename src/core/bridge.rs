//! Bridge resource controller.
//!
//! Owns the lifecycle of the single software bridge that aggregates the two
//! physical interfaces. Setup and teardown are user-confirmed and idempotent.
//! The controller does not know which capture sessions depend on the bridge;
//! the registry sequences teardown after the last dependent stops.
//!
//! Setup steps run in a fixed order and stop at the first failure. Steps that
//! already ran are not rolled back.

use std::sync::Arc;

use serde::Serialize;

use super::confirm::{ButtonSet, Confirm, Prompt};
use super::runner::{CommandLine, CommandRunner};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("permission denied running `{command}`: {stderr}")]
    PermissionDenied { command: String, stderr: String },

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("could not run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl BridgeError {
    pub fn is_permission_denied(&self) -> bool {
        match self {
            BridgeError::PermissionDenied { .. } => true,
            BridgeError::Spawn { source, .. } => {
                source.kind() == std::io::ErrorKind::PermissionDenied
            }
            BridgeError::CommandFailed { .. } => false,
        }
    }
}

/// What a setup or teardown request ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BridgeOutcome {
    /// Setup ran every step.
    Applied,
    /// The bridge already held both members; nothing was executed.
    AlreadyActive,
    /// Teardown removed the bridge.
    TornDown,
    /// Teardown found no active bridge; nothing was executed.
    Inactive,
    /// The user declined the confirmation.
    Cancelled,
    /// Teardown skipped: a capture session still runs on the bridge.
    InUse,
}

/// Snapshot of the bridge as this controller last left it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeState {
    pub name: String,
    pub active: bool,
    pub members: [String; 2],
}

pub struct BridgeController {
    runner: Arc<dyn CommandRunner>,
    confirm: Arc<dyn Confirm>,
    name: String,
    members: [String; 2],
    elevate: bool,
    active: bool,
}

impl BridgeController {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        confirm: Arc<dyn Confirm>,
        name: impl Into<String>,
        members: [String; 2],
        elevate: bool,
    ) -> Self {
        Self {
            runner,
            confirm,
            name: name.into(),
            members,
            elevate,
            active: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_member(&self, interface: &str) -> bool {
        self.members.iter().any(|m| m == interface)
    }

    pub fn members(&self) -> &[String; 2] {
        &self.members
    }

    pub fn state(&self) -> BridgeState {
        BridgeState {
            name: self.name.clone(),
            active: self.active,
            members: self.members.clone(),
        }
    }

    /// Sync `active` with the host, so a bridge left behind by a previous run
    /// is known and can be torn down.
    pub async fn probe(&mut self) -> bool {
        let attached = self.attached_members().await;
        self.active = attached.as_deref().is_some_and(|m| self.holds_all_members(m));
        if self.active {
            tracing::info!("Found existing bridge {} with {:?}", self.name, self.members);
        }
        self.active
    }

    /// Create the bridge, with user confirmation.
    pub async fn setup(&mut self) -> Result<BridgeOutcome, BridgeError> {
        let attached = self.attached_members().await;
        if attached.as_deref().is_some_and(|m| self.holds_all_members(m)) {
            tracing::info!("Bridge {} already contains {:?}", self.name, self.members);
            self.active = true;
            return Ok(BridgeOutcome::AlreadyActive);
        }

        let prompt = Prompt::new(
            "Bridge setup",
            format!(
                "Bridge {} and {} into {}? IP forwarding and NAT will be enabled.",
                self.members[0], self.members[1], self.name
            ),
            ButtonSet::OkCancel,
        );
        if !self.confirm.confirm(&prompt).await {
            tracing::info!("Bridge setup declined");
            return Ok(BridgeOutcome::Cancelled);
        }

        self.step(["sysctl", "-w", "net.ipv4.ip_forward=1"]).await?;
        let bridge = self.name.clone();
        let bridge = bridge.as_str();
        self.ensure_rule(Some("nat"), "POSTROUTING", &["-o", bridge, "-j", "MASQUERADE"])
            .await?;
        self.ensure_rule(None, "FORWARD", &["-i", bridge, "-j", "ACCEPT"]).await?;
        self.ensure_rule(None, "FORWARD", &["-o", bridge, "-j", "ACCEPT"]).await?;

        if attached.is_none() {
            self.step(["ip", "link", "add", "name", bridge, "type", "bridge"])
                .await?;
        }
        let members = self.members.clone();
        for member in &members {
            self.step(["ip", "link", "set", member.as_str(), "master", bridge])
                .await?;
        }
        for iface in members.iter().map(String::as_str).chain([bridge]) {
            self.step(["ip", "link", "set", iface, "up"]).await?;
        }

        self.active = true;
        tracing::info!("Bridge {bridge} is up with {:?}", members);
        Ok(BridgeOutcome::Applied)
    }

    /// Remove the bridge after asking the user. `restore` is brought back up
    /// afterwards (the first member when `None`).
    pub async fn teardown(&mut self, restore: Option<&str>) -> Result<BridgeOutcome, BridgeError> {
        self.teardown_inner(restore, true).await
    }

    /// Remove the bridge without asking; the caller already confirmed.
    pub async fn force_teardown(
        &mut self,
        restore: Option<&str>,
    ) -> Result<BridgeOutcome, BridgeError> {
        self.teardown_inner(restore, false).await
    }

    async fn teardown_inner(
        &mut self,
        restore: Option<&str>,
        ask: bool,
    ) -> Result<BridgeOutcome, BridgeError> {
        if !self.active {
            return Ok(BridgeOutcome::Inactive);
        }
        if ask {
            let prompt = Prompt::new(
                "Bridge teardown",
                format!("Remove bridge {}?", self.name),
                ButtonSet::OkCancel,
            );
            if !self.confirm.confirm(&prompt).await {
                tracing::info!("Bridge teardown declined, {} stays up", self.name);
                return Ok(BridgeOutcome::Cancelled);
            }
        }

        let bridge = self.name.clone();
        self.step(["ip", "link", "set", bridge.as_str(), "down"]).await?;
        self.step(["ip", "link", "delete", bridge.as_str(), "type", "bridge"])
            .await?;
        self.active = false;

        let restore = restore.unwrap_or(self.members[0].as_str()).to_string();
        self.step(["ip", "link", "set", restore.as_str(), "up"]).await?;
        tracing::info!("Bridge {bridge} removed, {restore} restored");
        Ok(BridgeOutcome::TornDown)
    }

    /// Member interfaces currently enslaved to the bridge, or `None` when the
    /// bridge device does not exist.
    async fn attached_members(&self) -> Option<Vec<String>> {
        let cmd = CommandLine::new("ip", ["-o", "link", "show", "master", self.name.as_str()]);
        match self.runner.run(&cmd).await {
            Ok(out) if out.success() => Some(parse_link_names(&out.stdout)),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Failed to query bridge {}: {e}", self.name);
                None
            }
        }
    }

    fn holds_all_members(&self, attached: &[String]) -> bool {
        self.members.iter().all(|m| attached.contains(m))
    }

    /// Append an iptables rule unless an identical one is installed.
    async fn ensure_rule(
        &self,
        table: Option<&str>,
        chain: &str,
        rule: &[&str],
    ) -> Result<(), BridgeError> {
        let with_action = |action: &str| {
            let mut args: Vec<&str> = Vec::with_capacity(rule.len() + 4);
            if let Some(table) = table {
                args.extend(["-t", table]);
            }
            args.extend([action, chain]);
            args.extend_from_slice(rule);
            CommandLine::new("iptables", args).elevated(self.elevate)
        };

        let check = with_action("-C");
        if matches!(self.runner.run(&check).await, Ok(out) if out.success()) {
            return Ok(());
        }
        self.run_step(with_action("-A")).await
    }

    async fn step<const N: usize>(&self, argv: [&str; N]) -> Result<(), BridgeError> {
        let cmd = CommandLine::new(argv[0], argv[1..].iter().copied()).elevated(self.elevate);
        self.run_step(cmd).await
    }

    async fn run_step(&self, cmd: CommandLine) -> Result<(), BridgeError> {
        let command = cmd.to_string();
        let out = self
            .runner
            .run(&cmd)
            .await
            .map_err(|source| BridgeError::Spawn {
                command: command.clone(),
                source,
            })?;
        if out.success() {
            return Ok(());
        }
        let stderr = out.stderr.trim().to_string();
        tracing::warn!("Bridge step failed: {command}: {stderr}");
        if out.is_permission_denied() {
            Err(BridgeError::PermissionDenied { command, stderr })
        } else {
            Err(BridgeError::CommandFailed { command, stderr })
        }
    }
}

/// Interface names from `ip -o link show` output (`3: eth0: <...> ...`).
pub fn parse_link_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let name = line.split_whitespace().nth(1)?.trim_end_matches(':');
            Some(name.split('@').next().unwrap_or(name).to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeRunner, ScriptedConfirm};

    const MEMBERS_LISTED: &str = "3: eth0: <BROADCAST,MULTICAST,UP> mtu 1500 master br0 state UP\n\
                                  4: eth1: <BROADCAST,MULTICAST,UP> mtu 1500 master br0 state UP\n";

    fn controller(runner: &Arc<FakeRunner>, confirm: &Arc<ScriptedConfirm>) -> BridgeController {
        BridgeController::new(
            runner.clone(),
            confirm.clone(),
            "br0",
            ["eth0".into(), "eth1".into()],
            false,
        )
    }

    fn mutating(commands: &[String]) -> Vec<String> {
        commands
            .iter()
            .filter(|c| !c.starts_with("ip -o link show") && !c.contains(" -C "))
            .cloned()
            .collect()
    }

    #[test]
    fn test_parse_link_names() {
        assert_eq!(parse_link_names(MEMBERS_LISTED), vec!["eth0", "eth1"]);
        assert_eq!(
            parse_link_names("5: veth1@if4: <UP> mtu 1500 master br0\n"),
            vec!["veth1"]
        );
    }

    #[tokio::test]
    async fn test_setup_runs_steps_in_order() {
        let runner = Arc::new(FakeRunner::default());
        runner.fail_matching("ip -o link show master br0", "Cannot find device \"br0\"");
        runner.fail_matching("iptables -t nat -C", "Bad rule");
        runner.fail_matching("iptables -C", "Bad rule");
        let confirm = Arc::new(ScriptedConfirm::always(true));
        let mut bridge = controller(&runner, &confirm);

        assert_eq!(bridge.setup().await.unwrap(), BridgeOutcome::Applied);
        assert!(bridge.is_active());
        assert_eq!(
            mutating(&runner.commands()),
            vec![
                "sysctl -w net.ipv4.ip_forward=1",
                "iptables -t nat -A POSTROUTING -o br0 -j MASQUERADE",
                "iptables -A FORWARD -i br0 -j ACCEPT",
                "iptables -A FORWARD -o br0 -j ACCEPT",
                "ip link add name br0 type bridge",
                "ip link set eth0 master br0",
                "ip link set eth1 master br0",
                "ip link set eth0 up",
                "ip link set eth1 up",
                "ip link set br0 up",
            ]
        );
        assert_eq!(confirm.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_setup_is_idempotent_when_members_attached() {
        let runner = Arc::new(FakeRunner::default());
        runner.respond_matching("ip -o link show master br0", MEMBERS_LISTED);
        let confirm = Arc::new(ScriptedConfirm::always(true));
        let mut bridge = controller(&runner, &confirm);

        assert_eq!(bridge.setup().await.unwrap(), BridgeOutcome::AlreadyActive);
        assert!(bridge.is_active());
        assert!(mutating(&runner.commands()).is_empty());
        assert!(confirm.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_setup_declined_is_cancelled_not_error() {
        let runner = Arc::new(FakeRunner::default());
        runner.fail_matching("ip -o link show master br0", "Cannot find device");
        let confirm = Arc::new(ScriptedConfirm::always(false));
        let mut bridge = controller(&runner, &confirm);

        assert_eq!(bridge.setup().await.unwrap(), BridgeOutcome::Cancelled);
        assert!(!bridge.is_active());
        assert!(mutating(&runner.commands()).is_empty());
    }

    #[tokio::test]
    async fn test_setup_permission_failure_aborts_remaining_steps() {
        let runner = Arc::new(FakeRunner::default());
        runner.fail_matching("ip -o link show master br0", "Cannot find device");
        runner.deny_matching("iptables");
        let confirm = Arc::new(ScriptedConfirm::always(true));
        let mut bridge = controller(&runner, &confirm);

        let err = bridge.setup().await.unwrap_err();
        assert!(err.is_permission_denied());
        assert!(!bridge.is_active());
        let cmds = runner.commands();
        assert!(cmds.contains(&"sysctl -w net.ipv4.ip_forward=1".to_string()));
        assert!(!cmds.iter().any(|c| c.starts_with("ip link add")));
    }

    #[tokio::test]
    async fn test_setup_generic_failure_is_command_failed() {
        let runner = Arc::new(FakeRunner::default());
        runner.fail_matching("ip -o link show master br0", "Cannot find device");
        runner.fail_matching("ip link add", "RTNETLINK answers: File exists");
        let confirm = Arc::new(ScriptedConfirm::always(true));
        let mut bridge = controller(&runner, &confirm);

        let err = bridge.setup().await.unwrap_err();
        assert!(matches!(err, BridgeError::CommandFailed { .. }));
        assert!(!err.is_permission_denied());
    }

    #[tokio::test]
    async fn test_teardown_inactive_issues_no_commands() {
        let runner = Arc::new(FakeRunner::default());
        let confirm = Arc::new(ScriptedConfirm::always(true));
        let mut bridge = controller(&runner, &confirm);

        assert_eq!(bridge.teardown(None).await.unwrap(), BridgeOutcome::Inactive);
        assert!(runner.commands().is_empty());
        assert!(confirm.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_restores_selected_interface() {
        let runner = Arc::new(FakeRunner::default());
        runner.respond_matching("ip -o link show master br0", MEMBERS_LISTED);
        let confirm = Arc::new(ScriptedConfirm::always(true));
        let mut bridge = controller(&runner, &confirm);
        assert!(bridge.probe().await);

        let outcome = bridge.teardown(Some("eth1")).await.unwrap();
        assert_eq!(outcome, BridgeOutcome::TornDown);
        assert!(!bridge.is_active());
        assert_eq!(
            mutating(&runner.commands()),
            vec![
                "ip link set br0 down",
                "ip link delete br0 type bridge",
                "ip link set eth1 up",
            ]
        );
    }

    #[tokio::test]
    async fn test_teardown_declined_keeps_bridge() {
        let runner = Arc::new(FakeRunner::default());
        runner.respond_matching("ip -o link show master br0", MEMBERS_LISTED);
        let confirm = Arc::new(ScriptedConfirm::always(false));
        let mut bridge = controller(&runner, &confirm);
        bridge.probe().await;

        assert_eq!(bridge.teardown(None).await.unwrap(), BridgeOutcome::Cancelled);
        assert!(bridge.is_active());
    }

    #[tokio::test]
    async fn test_force_teardown_skips_prompt() {
        let runner = Arc::new(FakeRunner::default());
        runner.respond_matching("ip -o link show master br0", MEMBERS_LISTED);
        let confirm = Arc::new(ScriptedConfirm::always(false));
        let mut bridge = controller(&runner, &confirm);
        bridge.probe().await;

        assert_eq!(bridge.force_teardown(None).await.unwrap(), BridgeOutcome::TornDown);
        assert!(confirm.prompts().is_empty());
        assert!(runner.commands().contains(&"ip link set eth0 up".to_string()));
    }

    #[tokio::test]
    async fn test_sudo_prefix_applied_to_privileged_steps() {
        let runner = Arc::new(FakeRunner::default());
        runner.respond_matching("ip -o link show master br0", MEMBERS_LISTED);
        let confirm = Arc::new(ScriptedConfirm::always(true));
        let mut bridge = BridgeController::new(
            runner.clone(),
            confirm,
            "br0",
            ["eth0".into(), "eth1".into()],
            true,
        );
        bridge.probe().await;
        bridge.teardown(None).await.unwrap();
        assert!(runner.commands().contains(&"sudo ip link set br0 down".to_string()));
    }
}
