//! Host-facing building blocks: command execution, confirmation, interface
//! inventory, and the software bridge.
//!
//! - [`runner`]: one-shot OS commands as structured argv
//! - [`confirm`]: the user-confirmation seam
//! - [`inventory`]: interfaces, IPv4 addresses, carrier state
//! - [`bridge`]: setup and teardown of the two-member bridge

pub mod bridge;
pub mod confirm;
pub mod inventory;
pub mod runner;
