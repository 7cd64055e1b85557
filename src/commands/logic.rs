//! Pure business logic extracted from the command handlers.
//!
//! These functions take plain parameters (no registry, no IO) and can be
//! unit-tested without a runtime.

use std::path::PathBuf;

use serde::Deserialize;

use crate::capture::{CaptureFilter, CaptureParams, FilterFields, Slot};
use crate::core::confirm::{ButtonSet, Prompt};
use crate::error::AppError;

/// Raw capture form state as a front end submits it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CaptureRequest {
    pub interface: Option<String>,
    /// Free-form filter expression. Takes precedence over the structured fields.
    pub filter: Option<String>,
    pub protocol: Option<String>,
    pub port: Option<String>,
    pub src_host: Option<String>,
    pub dst_host: Option<String>,
    pub output_dir: Option<PathBuf>,
}

/// Validate a capture form into start parameters.
pub fn build_capture_params(request: CaptureRequest) -> Result<CaptureParams, AppError> {
    let raw = request.filter.as_deref().map(str::trim).filter(|f| !f.is_empty());
    let filter = match raw {
        Some(text) => CaptureFilter::parse(text)?,
        None => FilterFields::from_form(
            request.protocol.as_deref().unwrap_or_default(),
            request.port.as_deref().unwrap_or_default(),
            request.src_host.as_deref().unwrap_or_default(),
            request.dst_host.as_deref().unwrap_or_default(),
        )?
        .build(),
    };
    let interface = request
        .interface
        .map(|i| i.trim().to_string())
        .filter(|i| !i.is_empty());
    Ok(CaptureParams {
        interface,
        filter,
        output_dir: request.output_dir,
    })
}

/// What to show for an interface in the connected-devices view.
pub fn device_label(addresses: &[String]) -> String {
    if addresses.is_empty() {
        "no device connected".to_string()
    } else {
        addresses.join(", ")
    }
}

pub fn quit_prompt() -> Prompt {
    Prompt::new(
        "Captures running",
        "Stop all running captures and quit?",
        ButtonSet::YesNoCancel,
    )
}

pub fn remove_prompt(name: &str) -> Prompt {
    Prompt::new(
        "Delete backup",
        format!("Permanently delete {name}?"),
        ButtonSet::OkCancel,
    )
}

/// One line of console input, parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Toggle { slot: Slot, request: CaptureRequest },
    Stop(Slot),
    StopAll,
    Status,
    Interfaces,
    Devices,
    BridgeUp,
    BridgeDown { restore: Option<String> },
    BridgeState,
    Backups,
    Copy { name: String, dest: Option<PathBuf> },
    Remove(String),
    Help,
    Quit,
}

pub const HELP: &str = "\
toggle <slot> [iface=NAME] [out=DIR] [proto=P] [port=N] [src=IP] [dst=IP] [-- FILTER...]
stop <slot> | stopall | status | ifaces | devices
bridge up | bridge down [RESTORE_IFACE] | bridge state
backups | copy <name> [DIR] | rm <name>
help | quit
slots: primary (1), secondary (2), bridge (3)";

/// Parse a console line. Blank lines yield `None`.
pub fn parse_console_command(line: &str) -> Result<Option<ConsoleCommand>, AppError> {
    let (head, filter) = match line.split_once(" -- ") {
        Some((head, filter)) => (head, Some(filter.trim().to_string())),
        None => (line, None),
    };
    let mut words = head.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "toggle" | "start" => {
            let slot = parse_slot(words.next())?;
            let mut request = CaptureRequest {
                filter,
                ..CaptureRequest::default()
            };
            for word in words {
                let (key, value) = word
                    .split_once('=')
                    .ok_or_else(|| AppError::InvalidInput(format!("expected key=value, got `{word}`")))?;
                let value = value.to_string();
                match key {
                    "iface" | "interface" => request.interface = Some(value),
                    "out" => request.output_dir = Some(PathBuf::from(value)),
                    "proto" | "protocol" => request.protocol = Some(value),
                    "port" => request.port = Some(value),
                    "src" => request.src_host = Some(value),
                    "dst" => request.dst_host = Some(value),
                    other => {
                        return Err(AppError::InvalidInput(format!("unknown option `{other}`")))
                    }
                }
            }
            ConsoleCommand::Toggle { slot, request }
        }
        "stop" => ConsoleCommand::Stop(parse_slot(words.next())?),
        "stopall" => ConsoleCommand::StopAll,
        "status" => ConsoleCommand::Status,
        "ifaces" | "interfaces" => ConsoleCommand::Interfaces,
        "devices" => ConsoleCommand::Devices,
        "bridge" => match words.next() {
            Some("up") => ConsoleCommand::BridgeUp,
            Some("down") => ConsoleCommand::BridgeDown {
                restore: words.next().map(str::to_string),
            },
            Some("state") | None => ConsoleCommand::BridgeState,
            Some(other) => {
                return Err(AppError::InvalidInput(format!("unknown bridge action `{other}`")))
            }
        },
        "backups" | "history" => ConsoleCommand::Backups,
        "copy" => ConsoleCommand::Copy {
            name: required(words.next(), "backup file name")?,
            dest: words.next().map(PathBuf::from),
        },
        "rm" | "remove" => ConsoleCommand::Remove(required(words.next(), "backup file name")?),
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(AppError::InvalidInput(format!("unknown command `{other}`"))),
    };
    Ok(Some(command))
}

fn parse_slot(word: Option<&str>) -> Result<Slot, AppError> {
    required(word, "slot")?.parse().map_err(AppError::InvalidInput)
}

fn required(word: Option<&str>, what: &str) -> Result<String, AppError> {
    word.map(str::to_string)
        .ok_or_else(|| AppError::InvalidInput(format!("missing {what}")))
}
