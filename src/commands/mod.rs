//! Control-surface command handlers, organized by functional domain.
//!
//! - `capture`: toggle/stop sessions, status, bridge control
//! - `interfaces`: interface listing and connected devices
//! - `history`: backup listing, copy, delete
//! - `logic`: pure business logic functions (unit-testable)
//! - `state`: shared `AppState` definition

pub mod capture;
pub mod history;
pub mod interfaces;
pub mod logic;
mod state;

pub use logic::ConsoleCommand;
pub use state::AppState;
