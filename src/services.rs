//! Control loop.
//!
//! `ControlService` owns the application state and runs on a single task:
//! each iteration waits for either a console line or a pipeline event and
//! handles it to completion before taking the next one. Capture state is
//! therefore only ever touched from this task.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

use crate::capture::mux::Routed;
use crate::capture::{CaptureRegistry, PipelineSpawner, ProcessEvent, ProcessEventKind};
use crate::commands::{self, AppState, ConsoleCommand};
use crate::config::Settings;
use crate::console::{self, ConsoleConfirm, ConsoleInput};
use crate::core::bridge::BridgeController;
use crate::core::inventory::SystemInventory;
use crate::core::runner::SystemRunner;
use crate::error::AppError;
use crate::history::BackupStore;

/// How long quitting waits for stopped pipelines to report their exit.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub struct ControlService {
    state: AppState,
    input: ConsoleInput,
    spawner: Arc<PipelineSpawner>,
}

impl ControlService {
    /// Build the state from settings in dependency order and run until quit.
    pub async fn start() -> anyhow::Result<()> {
        let settings = Settings::load().context("loading settings")?;
        tracing::info!(
            "Backups in {}, bridge {} over {:?}",
            settings.backup_dir.display(),
            settings.bridge_name,
            settings.bridge_members
        );

        let input = console::spawn_stdin_reader();
        let confirm = Arc::new(ConsoleConfirm::new(Arc::clone(&input)));
        let runner = Arc::new(SystemRunner);
        let inventory = Arc::new(SystemInventory::new(runner.clone(), settings.bridge_name.clone()));
        let spawner = Arc::new(PipelineSpawner::new());
        let bridge = BridgeController::new(
            runner,
            confirm.clone(),
            settings.bridge_name.clone(),
            settings.bridge_members.clone(),
            settings.use_sudo,
        );
        let backups = BackupStore::new(settings.backup_dir.clone());
        let mut registry =
            CaptureRegistry::new(settings, bridge, inventory.clone(), spawner.clone());
        registry.probe_bridge().await;

        let mut service = ControlService {
            state: AppState {
                registry,
                inventory,
                backups,
                confirm,
            },
            input,
            spawner,
        };
        service.run().await;
        Ok(())
    }

    async fn run(&mut self) {
        println!("pi-capture ready. Type `help` for commands.");
        loop {
            let input = Arc::clone(&self.input);
            tokio::select! {
                line = async { input.lock().await.recv().await } => {
                    let flow = match line {
                        Some(line) => self.handle_line(&line).await,
                        None => {
                            tracing::info!("Console closed, shutting down");
                            self.shutdown().await;
                            Flow::Quit
                        }
                    };
                    if flow == Flow::Quit {
                        break;
                    }
                }
                Some(event) = self.state.registry.next_event() => {
                    self.on_event(&event).await;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted, shutting down");
                    self.shutdown().await;
                    break;
                }
            }
        }
        if self.spawner.live_count() > 0 {
            tracing::warn!("{} pipeline(s) still alive at exit", self.spawner.live_count());
            self.spawner.terminate_all();
        }
    }

    async fn on_event(&mut self, event: &ProcessEvent) {
        let routed = self.state.registry.dispatch(event);
        match routed {
            Routed::Output(slot) => match &event.kind {
                ProcessEventKind::Stdout(data) | ProcessEventKind::Stderr(data) => {
                    print!("[{slot}] {data}");
                }
                ProcessEventKind::Exit(_) => {}
            },
            Routed::Exited { slot, code } => match code {
                Some(code) => println!("[{slot}] exit code: {code}"),
                None => println!("[{slot}] terminated by signal"),
            },
            Routed::Dropped { .. } => {}
        }

        if matches!(routed, Routed::Exited { .. }) {
            match commands::capture::release_idle_bridge(&mut self.state).await {
                Ok(Some(outcome)) => println!("bridge: {}", to_json(&outcome)),
                Ok(None) => {}
                Err(e) => print_error(&e),
            }
        }
    }

    async fn handle_line(&mut self, line: &str) -> Flow {
        let command = match commands::logic::parse_console_command(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Flow::Continue,
            Err(e) => {
                print_error(&e);
                return Flow::Continue;
            }
        };

        let state = &mut self.state;
        let result = match command {
            ConsoleCommand::Toggle { slot, request } => {
                commands::capture::toggle_capture(state, slot, request)
                    .await
                    .map(|o| to_json(&o))
            }
            ConsoleCommand::Stop(slot) => commands::capture::stop_capture(state, slot)
                .await
                .map(|o| to_json(&o)),
            ConsoleCommand::StopAll => commands::capture::stop_all_captures(state, true)
                .await
                .map(|n| format!("stopped {n} session(s)")),
            ConsoleCommand::Status => Ok(to_json(&commands::capture::capture_status(state))),
            ConsoleCommand::Interfaces => {
                Ok(to_json(&commands::interfaces::list_interfaces(state).await))
            }
            ConsoleCommand::Devices => {
                Ok(to_json(&commands::interfaces::connected_devices(state).await))
            }
            ConsoleCommand::BridgeUp => commands::capture::setup_bridge(state)
                .await
                .map(|o| to_json(&o)),
            ConsoleCommand::BridgeDown { restore } => {
                commands::capture::teardown_bridge(state, restore)
                    .await
                    .map(|o| to_json(&o))
            }
            ConsoleCommand::BridgeState => Ok(to_json(&commands::capture::bridge_state(state))),
            ConsoleCommand::Backups => {
                commands::history::list_backups(state).map(|entries| to_json(&entries))
            }
            ConsoleCommand::Copy { name, dest } => {
                commands::history::copy_backup(state, &name, dest)
                    .await
                    .map(|copied| match copied {
                        Some(path) => format!("copied to {}", path.display()),
                        None => "copy cancelled".to_string(),
                    })
            }
            ConsoleCommand::Remove(name) => commands::history::remove_backup(state, &name)
                .await
                .map(|removed| (if removed { "removed" } else { "kept" }).to_string()),
            ConsoleCommand::Help => Ok(commands::logic::HELP.to_string()),
            ConsoleCommand::Quit => {
                return if self.request_quit().await {
                    Flow::Quit
                } else {
                    Flow::Continue
                };
            }
        };

        match result {
            Ok(text) => println!("{text}"),
            Err(e) => print_error(&e),
        }
        Flow::Continue
    }

    /// Quit, asking first when captures are running. `false` when the user
    /// chose to stay.
    async fn request_quit(&mut self) -> bool {
        if commands::capture::any_running(&self.state)
            && !self
                .state
                .confirm
                .confirm(&commands::logic::quit_prompt())
                .await
        {
            return false;
        }
        self.shutdown().await;
        true
    }

    /// Stop everything, then give stopped pipelines a moment to exit so
    /// their files are flushed.
    async fn shutdown(&mut self) {
        if let Err(e) = commands::capture::stop_all_captures(&mut self.state, false).await {
            print_error(&e);
        }
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while self.state.registry.draining_count() > 0 {
                match self.state.registry.next_event().await {
                    Some(event) => self.on_event(&event).await,
                    None => break,
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                "{} pipeline(s) did not exit within {DRAIN_TIMEOUT:?}",
                self.state.registry.draining_count()
            );
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}

fn print_error(err: &AppError) {
    tracing::debug!("Command failed: {err}");
    println!("error: {}", to_json(err));
}
