//! Event multiplexer: the one subscription to pipeline events.
//!
//! Every spawned pipeline reports through the same unbounded channel. The
//! multiplexer is subscribed once, when the registry is built; later
//! `ensure_subscribed` calls from session starts are no-ops, so an event is
//! never delivered twice. Routing is by process identity only: an event whose
//! id no session holds any more is dropped.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::command::Slot;
use super::session::CaptureSession;
use super::{ProcessEvent, ProcessId};

/// Where an event ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Appended to the owning session's output.
    Output(Slot),
    /// Terminal event; the owning session is now idle.
    Exited { slot: Slot, code: Option<i32> },
    /// No session owns this identity.
    Dropped { id: ProcessId, was_exit: bool },
}

pub struct EventMultiplexer {
    tx: UnboundedSender<ProcessEvent>,
    rx: UnboundedReceiver<ProcessEvent>,
    subscribed: bool,
}

impl EventMultiplexer {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            subscribed: false,
        }
    }

    /// Sender handed to the spawner for each new pipeline.
    pub fn sender(&self) -> UnboundedSender<ProcessEvent> {
        self.tx.clone()
    }

    /// Subscribe unless already subscribed. Returns `true` only on the first call.
    pub fn ensure_subscribed(&mut self) -> bool {
        if self.subscribed {
            return false;
        }
        self.subscribed = true;
        tracing::debug!("Process event stream subscribed");
        true
    }

    #[cfg(test)]
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Wait for the next event. Never resolves to `None` while the
    /// multiplexer is alive, since it keeps a sender of its own.
    pub async fn recv(&mut self) -> Option<ProcessEvent> {
        if !self.subscribed {
            return std::future::pending().await;
        }
        self.rx.recv().await
    }

    /// Take an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<ProcessEvent> {
        if !self.subscribed {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Deliver `event` to the session holding its process identity.
    pub fn route<'a, I>(sessions: I, event: &ProcessEvent) -> Routed
    where
        I: IntoIterator<Item = &'a mut CaptureSession>,
    {
        let owner = sessions.into_iter().find(|s| s.owns(event.id));
        let Some(session) = owner else {
            return Routed::Dropped {
                id: event.id,
                was_exit: event.is_exit(),
            };
        };
        if session.on_event(&event.kind) {
            let code = session.last_exit().flatten();
            Routed::Exited {
                slot: session.slot(),
                code,
            }
        } else {
            Routed::Output(session.slot())
        }
    }
}

impl Default for EventMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}
