//! The control context (C7): the state machine's only mutable state. Holds
//! the last-seen detections and statuses, the inferred actor motion, the
//! pick queue, and per-target attempt counters, and exposes the
//! side-effecting helpers §4.6 assigns to it so the FSM itself stays a pure
//! dispatch function over events.

use crate::config::{BehaviourConfig, SchedulerConfig};
use crate::events::TimerId;
use crate::links::{ActorLink, ArmLink};
use crate::protocol::{ActorStatus, ArmStatus};
use crate::scheduler::Scheduler;
use crate::types::{Detection, FrameData};
use std::collections::VecDeque;
use std::sync::Arc;

/// Motion inferred from issued commands and observed status. Written only
/// by the context, per §3 — the MCU's own status reports can upgrade
/// `Stopped` to `Forward` (it may have auto-moved) but never the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorMotion {
    Stopped,
    Forward,
    Turning,
}

#[derive(Debug, Clone, Copy)]
struct PickTarget {
    id: u32,
    x_mm: f32,
    y_mm: f32,
    attempts: u32,
}

pub struct ControlContext {
    actor: Arc<ActorLink>,
    arm: Arc<ArmLink>,
    scheduler: Arc<Scheduler>,
    behaviour: BehaviourConfig,
    scheduler_config: SchedulerConfig,

    last_detections: Vec<Detection>,
    last_frame: Option<FrameData>,
    last_actor_status: Option<ActorStatus>,
    last_arm_status: Option<ArmStatus>,
    motion: ActorMotion,

    pick_queue: VecDeque<PickTarget>,
    current_target: Option<PickTarget>,
    waiting_for_arm: bool,
}

impl ControlContext {
    pub fn new(
        actor: Arc<ActorLink>,
        arm: Arc<ArmLink>,
        scheduler: Arc<Scheduler>,
        behaviour: BehaviourConfig,
        scheduler_config: SchedulerConfig,
    ) -> Self {
        Self {
            actor,
            arm,
            scheduler,
            behaviour,
            scheduler_config,
            last_detections: Vec::new(),
            last_frame: None,
            last_actor_status: None,
            last_arm_status: None,
            motion: ActorMotion::Stopped,
            pick_queue: VecDeque::new(),
            current_target: None,
            waiting_for_arm: false,
        }
    }

    pub fn update_detections(&mut self, detections: Vec<Detection>, frame: FrameData) {
        self.last_detections = detections;
        self.last_frame = Some(frame);
    }

    /// Upgrades `Stopped` to `Forward` on an unsolicited "is moving" report
    /// (the MCU may have auto-moved); a "stopped" report always wins.
    pub fn update_actor_status(&mut self, status: ActorStatus) {
        self.last_actor_status = Some(status);
        if status.is_moving {
            if self.motion == ActorMotion::Stopped {
                self.motion = ActorMotion::Forward;
            }
        } else {
            self.motion = ActorMotion::Stopped;
        }
    }

    pub fn update_arm_status(&mut self, status: ArmStatus) {
        self.last_arm_status = Some(status);
        if !status.is_busy && self.waiting_for_arm {
            self.waiting_for_arm = false;
        }
    }

    pub fn is_waiting_for_arm(&self) -> bool {
        self.waiting_for_arm
    }

    pub fn pick_queue_is_empty(&self) -> bool {
        self.pick_queue.is_empty()
    }

    fn candidate_targets(&self) -> Vec<PickTarget> {
        let Some(frame) = &self.last_frame else { return Vec::new() };
        let image_center_x = frame.image_width as f32 / 2.0;
        let mut candidates: Vec<(f32, PickTarget)> = self
            .last_detections
            .iter()
            .filter(|d| d.confidence >= self.behaviour.detection_min_confidence)
            .filter_map(|d| {
                let (cx, cy) = d.center();
                let offset = (cx - image_center_x).abs();
                if offset <= self.behaviour.detection_center_tolerance * frame.image_width as f32 {
                    Some((
                        offset,
                        PickTarget { id: d.id, x_mm: cx, y_mm: cy, attempts: 0 },
                    ))
                } else {
                    None
                }
            })
            .collect();
        candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        candidates.into_iter().map(|(_, target)| target).collect()
    }

    pub fn has_pick_candidates(&self) -> bool {
        !self.candidate_targets().is_empty()
    }

    /// Rebuilds the pick queue from the current detection set. Returns true
    /// iff the queue is non-empty afterward.
    pub fn prepare_pick_queue(&mut self) -> bool {
        self.pick_queue = self.candidate_targets().into_iter().collect();
        !self.pick_queue.is_empty()
    }

    /// No-op unless the queue is already empty, per §4.6.
    pub fn refresh_pick_queue(&mut self) {
        if self.pick_queue.is_empty() {
            self.pick_queue = self.candidate_targets().into_iter().collect();
        }
    }

    pub fn clear_pick_cycle(&mut self) {
        self.pick_queue.clear();
        self.current_target = None;
        self.waiting_for_arm = false;
    }

    pub fn complete_current_pick(&mut self) {
        self.current_target = None;
    }

    /// Pops the next eligible target and issues `arm.pick`. Targets that
    /// have already exhausted their attempt budget are dropped outright
    /// (permanently bounding per-target issue count, per §8's pick attempt
    /// invariant); targets whose pick attempt fails are pushed to the back
    /// of the queue for a later retry. Returns true iff a pick was
    /// acknowledged this call.
    pub async fn command_next_pick(&mut self) -> bool {
        loop {
            let Some(mut target) = self.pick_queue.pop_front() else {
                return false;
            };
            if target.attempts >= self.behaviour.max_arm_pick_attempts {
                continue;
            }
            target.attempts += 1;
            let acked = self.arm.pick(target.x_mm, target.y_mm).await;
            if acked {
                self.current_target = Some(target);
                self.waiting_for_arm = true;
                return true;
            }
            self.pick_queue.push_back(target);
            return false;
        }
    }

    pub fn should_rotate_due_to_obstacle(&self) -> bool {
        let Some(status) = self.last_actor_status else { return false };
        let Some(distance_cm) = status.distance_cm else { return false };
        self.motion != ActorMotion::Turning
            && distance_cm as f32 <= self.behaviour.distance_stop_threshold_cm
    }

    /// Idempotent: returns true immediately if already stopped, per §4.6.
    pub async fn ensure_actor_stopped(&mut self) -> bool {
        if self.motion == ActorMotion::Stopped {
            return true;
        }
        let acked = self.actor.stop().await;
        if acked {
            self.motion = ActorMotion::Stopped;
        }
        acked
    }

    pub async fn command_move_forward(&mut self) -> bool {
        if self.motion == ActorMotion::Forward {
            return true;
        }
        let acked = self.actor.move_forward().await;
        if acked {
            self.motion = ActorMotion::Forward;
        }
        acked
    }

    pub async fn command_turn(&mut self) -> bool {
        if self.motion == ActorMotion::Turning {
            return true;
        }
        let acked = self.actor.turn_90().await;
        if acked {
            self.motion = ActorMotion::Turning;
        }
        acked
    }

    pub fn start_scan_only_timer(&self) {
        self.scheduler.start_interval(
            TimerId::ScanOnlyTimeout,
            std::time::Duration::from_millis(self.scheduler_config.scan_only_timeout_ms),
        );
    }

    pub fn cancel_scan_only_timer(&self) {
        self.scheduler.cancel(TimerId::ScanOnlyTimeout);
    }

    pub fn start_move_only_timer(&self) {
        self.scheduler.start_interval(
            TimerId::MoveOnlyCountdown,
            std::time::Duration::from_millis(self.scheduler_config.move_only_duration_ms),
        );
    }

    pub fn cancel_move_only_timer(&self) {
        self.scheduler.cancel(TimerId::MoveOnlyCountdown);
    }
}
