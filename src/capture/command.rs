//! Capture slots and the command a session runs.
//!
//! A `CaptureCommand` renders a three-stage pipeline:
//!
//! 1. `tcpdump -i IFACE -U -w - FILTER..` captures raw packets to stdout
//! 2. `tee OUTPUT` writes the full capture to the user's output directory
//! 3. `tcpdump -r - -U -C ROTATION -w BACKUP --print` writes the size-rotated
//!    backup copy and prints every packet it wrote, which is the live view
//!
//! Both files share the same name, derived from the interface and the
//! session's start timestamp.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::filter::CaptureFilter;
use crate::config;
use crate::core::runner::CommandLine;

/// A fixed, named capture channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Primary,
    Secondary,
    Bridge,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::Primary, Slot::Secondary, Slot::Bridge];

    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Primary => "primary",
            Slot::Secondary => "secondary",
            Slot::Bridge => "bridge",
        }
    }

    /// Backup rotation threshold for captures in this slot.
    pub fn rotation_mb(self) -> u32 {
        match self {
            Slot::Primary | Slot::Secondary => config::PHYSICAL_ROTATION_MB,
            Slot::Bridge => config::BRIDGE_ROTATION_MB,
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Slot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" | "1" => Ok(Slot::Primary),
            "secondary" | "2" => Ok(Slot::Secondary),
            "bridge" | "combined" | "3" => Ok(Slot::Bridge),
            other => Err(format!("unknown slot `{other}`")),
        }
    }
}

/// Format a start time the way capture file names embed it.
pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.format(config::TIMESTAMP_FORMAT).to_string()
}

/// Timestamp for a session starting now.
pub fn timestamp_now() -> String {
    format_timestamp(Local::now())
}

/// Everything needed to run one capture. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureCommand {
    pub interface: String,
    pub filter: Option<CaptureFilter>,
    pub output_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub timestamp: String,
    pub rotation_size_mb: u32,
    pub tool: String,
    pub elevate: bool,
}

impl CaptureCommand {
    /// `capture-<iface>_<timestamp>.pcap`, or `capture_<timestamp>.pcap`
    /// when no interface name is known.
    pub fn file_name(&self) -> String {
        if self.interface.is_empty() {
            format!(
                "{}_{}.{}",
                config::CAPTURE_FILE_PREFIX,
                self.timestamp,
                config::CAPTURE_FILE_EXT
            )
        } else {
            format!(
                "{}-{}_{}.{}",
                config::CAPTURE_FILE_PREFIX,
                self.interface,
                self.timestamp,
                config::CAPTURE_FILE_EXT
            )
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(self.file_name())
    }

    pub fn backup_path(&self) -> PathBuf {
        self.backup_dir.join(self.file_name())
    }

    /// The pipeline stages as structured argv, in data-flow order.
    pub fn stages(&self) -> Vec<CommandLine> {
        let mut capture = vec![
            "-i".to_string(),
            self.interface.clone(),
            "-U".into(),
            "-w".into(),
            "-".into(),
        ];
        if let Some(filter) = &self.filter {
            capture.extend(filter.tokens().iter().cloned());
        }

        let tee = vec![path_arg(&self.output_path())];

        let mut reread = vec![
            "-r".to_string(),
            "-".into(),
            "-U".into(),
            "-C".into(),
            self.rotation_size_mb.to_string(),
            "-w".into(),
            path_arg(&self.backup_path()),
            "--print".into(),
        ];
        if self.elevate {
            // Keep root so rotated files can be created in the backup directory.
            reread.extend(["-Z".to_string(), "root".into()]);
        }

        vec![
            CommandLine::new(self.tool.clone(), capture).elevated(self.elevate),
            CommandLine::new("tee", tee).elevated(self.elevate),
            CommandLine::new(self.tool.clone(), reread).elevated(self.elevate),
        ]
    }

    /// Human-readable rendering of the pipeline, for the command preview.
    pub fn display(&self) -> String {
        self.stages()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn command(interface: &str, filter: Option<&str>) -> CaptureCommand {
        CaptureCommand {
            interface: interface.into(),
            filter: filter.and_then(|f| CaptureFilter::parse(f).unwrap()),
            output_dir: PathBuf::from("/out"),
            backup_dir: PathBuf::from("../backup"),
            timestamp: "2024-01-01-00-00-00".into(),
            rotation_size_mb: Slot::Primary.rotation_mb(),
            tool: "tcpdump".into(),
            elevate: false,
        }
    }

    #[test]
    fn test_file_names_in_both_destinations() {
        let cmd = command("eth0", None);
        assert_eq!(cmd.file_name(), "capture-eth0_2024-01-01-00-00-00.pcap");
        assert_eq!(
            cmd.output_path(),
            PathBuf::from("/out/capture-eth0_2024-01-01-00-00-00.pcap")
        );
        assert_eq!(
            cmd.backup_path(),
            PathBuf::from("../backup/capture-eth0_2024-01-01-00-00-00.pcap")
        );
    }

    #[test]
    fn test_file_name_without_interface() {
        assert_eq!(command("", None).file_name(), "capture_2024-01-01-00-00-00.pcap");
    }

    #[test]
    fn test_stages_without_filter() {
        let stages = command("eth0", None).stages();
        assert_eq!(stages.len(), 3);
        assert_eq!(stages[0].to_string(), "tcpdump -i eth0 -U -w -");
        assert_eq!(stages[1].to_string(), "tee /out/capture-eth0_2024-01-01-00-00-00.pcap");
        assert_eq!(
            stages[2].to_string(),
            "tcpdump -r - -U -C 1000 -w ../backup/capture-eth0_2024-01-01-00-00-00.pcap --print"
        );
    }

    #[test]
    fn test_filter_tokens_are_separate_arguments() {
        let stages = command("eth1", Some("tcp and port 22")).stages();
        assert_eq!(
            stages[0].args,
            vec!["-i", "eth1", "-U", "-w", "-", "tcp", "and", "port", "22"]
        );
    }

    #[test]
    fn test_elevated_stages_use_sudo() {
        let mut cmd = command("br0", None);
        cmd.elevate = true;
        cmd.rotation_size_mb = Slot::Bridge.rotation_mb();
        let stages = cmd.stages();
        assert!(stages.iter().all(|s| s.program == "sudo"));
        assert!(stages[2].args.contains(&"10000".to_string()));
        assert!(cmd.display().starts_with("sudo tcpdump -i br0"));
        assert_eq!(cmd.display().matches(" | ").count(), 2);
    }

    #[test]
    fn test_command_is_deterministic() {
        assert_eq!(command("eth0", Some("udp")).display(), command("eth0", Some("udp")).display());
    }

    #[test]
    fn test_format_timestamp() {
        let at = Local.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap();
        assert_eq!(format_timestamp(at), "2024-01-01-00-00-00");
    }

    #[test]
    fn test_slot_parsing() {
        assert_eq!("combined".parse::<Slot>().unwrap(), Slot::Bridge);
        assert_eq!("Primary".parse::<Slot>().unwrap(), Slot::Primary);
        assert!("fourth".parse::<Slot>().is_err());
    }
}
