//! The event bus (C5) and the timer identifiers (C6) and tagged-union
//! event type (C5) that flow through it.
//!
//! Realized as a split sender/receiver pair over a bounded `tokio::mpsc`
//! channel rather than a single `EventBus` object: `try_send` gives the
//! "non-blocking publish, drop newest with a warning when full" semantics
//! directly, and cloneable senders let every producer (scheduler, bus
//! listeners, the vision feed, the engine itself) hold its own handle while
//! the engine alone owns the receiver.

use crate::protocol::{ActorStatus, ArmStatus};
use crate::types::{Detection, FrameData};
use std::time::Duration;
use tokio::sync::mpsc;

pub const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum TimerId {
    ActorStatus,
    ArmStatus,
    ScanOnlyTimeout,
    MoveOnlyCountdown,
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub description: String,
    pub success: bool,
}

#[derive(Debug, Clone)]
pub enum ControlEvent {
    Detection {
        detections: Vec<Detection>,
        frame: FrameData,
    },
    ActorStatus(ActorStatus),
    ArmStatus(ArmStatus),
    Timer(TimerId),
    CommandResult(CommandResult),
    Stop(String),
}

#[derive(Clone)]
pub struct EventBusSender(mpsc::Sender<ControlEvent>);

impl EventBusSender {
    pub fn publish(&self, event: ControlEvent) {
        if let Err(err) = self.0.try_send(event) {
            match err {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::warn!("event bus full, dropping newest event");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    tracing::warn!("event bus closed, dropping event");
                }
            }
        }
    }

    pub fn stop(&self, reason: impl Into<String>) {
        self.publish(ControlEvent::Stop(reason.into()));
    }
}

pub struct EventBusReceiver(mpsc::Receiver<ControlEvent>);

impl EventBusReceiver {
    /// Returns the next event, or `None` if none arrived within `timeout`
    /// (or the bus was dropped).
    pub async fn get(&mut self, timeout: Duration) -> Option<ControlEvent> {
        tokio::time::timeout(timeout, self.0.recv()).await.ok().flatten()
    }
}

pub fn event_bus() -> (EventBusSender, EventBusReceiver) {
    let (tx, rx) = mpsc::channel(EVENT_BUS_CAPACITY);
    (EventBusSender(tx), EventBusReceiver(rx))
}
