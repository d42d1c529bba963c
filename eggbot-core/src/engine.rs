//! The control engine (C9): owns the single dispatch loop that gives the
//! state machine its single-threaded semantics. Periodic status polls are
//! issued here (not inside the FSM) so the bus reader never calls back into
//! FSM code synchronously, per §5's deadlock-avoidance note.

use crate::config::ControlConfig;
use crate::context::ControlContext;
use crate::error::{Error, Result};
use crate::events::{event_bus, ControlEvent, EventBusSender, TimerId};
use crate::links::{ActorLink, ArmLink};
use crate::scheduler::Scheduler;
use crate::state_machine::{State, StateMachine};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How long each dispatch-loop iteration blocks on `event_bus.get` before
/// re-checking whether a shutdown has been requested. Bounds how quickly
/// `stop()` can observe the stop flag, per §5.
const DISPATCH_POLL_TIMEOUT: Duration = Duration::from_millis(500);

pub struct ControlEngine {
    actor: Arc<ActorLink>,
    arm: Arc<ArmLink>,
    scheduler: Arc<Scheduler>,
    events: EventBusSender,
    config: ControlConfig,
    dispatch: Option<JoinHandle<()>>,
}

impl ControlEngine {
    pub async fn new(actor: Arc<ActorLink>, arm: Arc<ArmLink>, config: ControlConfig) -> (Self, EventReceiverHandle) {
        let (tx, rx) = event_bus();
        let scheduler = Arc::new(Scheduler::new(tx.clone()));
        (
            Self {
                actor,
                arm,
                scheduler,
                events: tx.clone(),
                config,
                dispatch: None,
            },
            EventReceiverHandle { receiver: rx },
        )
    }

    /// Exposes a clone of the event bus sender so external collaborators
    /// (vision pipeline, graceful-shutdown producer) can publish without
    /// holding a reference to the engine itself, per §6.
    pub fn events(&self) -> EventBusSender {
        self.events.clone()
    }

    pub async fn start(&mut self, mut receiver: EventReceiverHandle) -> Result<()> {
        if self.dispatch.is_some() {
            return Err(Error::AlreadyRunning);
        }

        self.actor.start().await;
        self.arm.start().await;

        self.scheduler.start_interval(
            TimerId::ActorStatus,
            Duration::from_millis(self.config.scheduler.actor_status_interval_ms),
        );
        self.scheduler.start_interval(
            TimerId::ArmStatus,
            Duration::from_millis(self.config.scheduler.arm_status_interval_ms),
        );

        let mut ctx = ControlContext::new(
            Arc::clone(&self.actor),
            Arc::clone(&self.arm),
            Arc::clone(&self.scheduler),
            self.config.behaviour.clone(),
            self.config.scheduler.clone(),
        );
        let mut fsm = StateMachine::new();
        fsm.start_patrol(&mut ctx).await;

        let actor = Arc::clone(&self.actor);
        let arm = Arc::clone(&self.arm);
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            dispatch_loop(&mut receiver.receiver, &mut fsm, &mut ctx, &actor, &arm, &events).await;
        });
        self.dispatch = Some(handle);
        Ok(())
    }

    /// Requests shutdown, joins the dispatch task, then stops the
    /// scheduler and both links (which decrement the shared bus's usage
    /// count and may close the port), per §4.8.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.dispatch.take() else {
            return Err(Error::NotRunning);
        };
        self.events.stop("engine stop requested");
        let _ = handle.await;
        self.scheduler.shutdown();
        self.actor.shutdown().await;
        self.arm.shutdown().await;
        Ok(())
    }
}

/// Carries the event bus receiver from construction to `start` without
/// making it part of `ControlEngine` itself — the receiver is moved into
/// the spawned dispatch task, so it can't live on `&self`. Use
/// `ControlEngine::events()` to get a sender for publishing onto the same
/// bus.
pub struct EventReceiverHandle {
    receiver: crate::events::EventBusReceiver,
}

async fn dispatch_loop(
    receiver: &mut crate::events::EventBusReceiver,
    fsm: &mut StateMachine,
    ctx: &mut ControlContext,
    actor: &Arc<ActorLink>,
    arm: &Arc<ArmLink>,
    events: &EventBusSender,
) {
    tracing::info!("control engine dispatch loop starting");
    loop {
        let Some(event) = receiver.get(DISPATCH_POLL_TIMEOUT).await else {
            continue;
        };

        match event {
            ControlEvent::Stop(reason) => {
                tracing::info!(%reason, "control engine dispatch loop stopping");
                break;
            }
            ControlEvent::Timer(TimerId::ActorStatus) => {
                if let Some(status) = actor.read_status().await {
                    events.publish(ControlEvent::ActorStatus(status));
                }
            }
            ControlEvent::Timer(TimerId::ArmStatus) => {
                if let Some(status) = arm.read_status().await {
                    events.publish(ControlEvent::ArmStatus(status));
                }
            }
            ControlEvent::Timer(timer_id) => {
                fsm.handle_timer(timer_id, ctx).await;
            }
            ControlEvent::Detection { detections, frame } => {
                fsm.handle_detection(detections, frame, ctx).await;
            }
            ControlEvent::ActorStatus(status) => {
                fsm.handle_actor_status(status, ctx).await;
            }
            ControlEvent::ArmStatus(status) => {
                fsm.handle_arm_status(status, ctx).await;
            }
            ControlEvent::CommandResult(result) => {
                tracing::debug!(description = %result.description, success = result.success, "command result observed");
            }
        }
    }
}

/// The FSM's current-state accessor for display purposes, per §6. Exposed
/// as a free function operating on the same `State` type the engine's
/// internals use, so a caller embedding the engine never needs to reach
/// into `ControlEngine`'s private fields.
pub fn state_name(state: State) -> String {
    state.to_string()
}
