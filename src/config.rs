//! Centralized runtime constants and user settings for pi-capture.
//!
//! Constants hold the fixed contract values (buffer cap, rotation thresholds,
//! file naming). `Settings` holds what an installation may override, loaded
//! from the JSON file named by `PI_CAPTURE_CONFIG`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Byte budget of a session's live output buffer. Exceeding it clears the buffer.
pub const OUTPUT_BUFFER_CAP: usize = 1024;

/// Backup rotation threshold for single-interface slots (tcpdump `-C`, millions of bytes).
pub const PHYSICAL_ROTATION_MB: u32 = 1000;

/// Backup rotation threshold for the bridge slot.
pub const BRIDGE_ROTATION_MB: u32 = 10000;

/// Timestamp format embedded in capture file names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Prefix of every capture file name.
pub const CAPTURE_FILE_PREFIX: &str = "capture";

/// Extension of every capture file name.
pub const CAPTURE_FILE_EXT: &str = "pcap";

/// Environment variable naming the settings file.
pub const SETTINGS_ENV: &str = "PI_CAPTURE_CONFIG";

/// Installation settings. Every field falls back to its default when absent.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Fixed directory receiving a copy of every capture.
    pub backup_dir: PathBuf,
    /// Output directory offered when the user has not picked one.
    pub default_output_dir: PathBuf,
    /// Software bridge device name.
    pub bridge_name: String,
    /// The two physical interfaces aggregated by the bridge.
    pub bridge_members: [String; 2],
    /// Default interface of the primary slot.
    pub primary_interface: String,
    /// Default interface of the secondary slot.
    pub secondary_interface: String,
    /// Prefix privileged commands with `sudo`.
    pub use_sudo: bool,
    /// Capture tool binary.
    pub capture_tool: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("../backup"),
            default_output_dir: PathBuf::from("/home/user/app/capture"),
            bridge_name: "br0".into(),
            bridge_members: ["eth0".into(), "eth1".into()],
            primary_interface: "eth0".into(),
            secondary_interface: "eth1".into(),
            use_sudo: true,
            capture_tool: "tcpdump".into(),
        }
    }
}

impl Settings {
    /// Load settings from `path`.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing settings file {}", path.display()))
    }

    /// Load settings from `PI_CAPTURE_CONFIG`, or defaults when it is unset.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var_os(SETTINGS_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }
}
