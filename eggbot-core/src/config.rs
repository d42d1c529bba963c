//! Typed configuration surface. Supplements the distilled core with the
//! full set of tunables the original `config/models.py` exposed; unlike the
//! source, nothing here is loaded from a file — callers build these structs
//! in code and pass them to the engine.

use crate::transport::PortConfig;
use std::time::Duration;

/// Timeouts governing actor/arm link requests. `max_retries` is carried for
/// configuration-surface completeness but, matching the source, no link
/// operation actually retries on it.
#[derive(Debug, Clone)]
pub struct SerialLinkConfig {
    pub reconnect_delay_ms: u64,
    pub ack_timeout_ms: u64,
    pub response_timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for SerialLinkConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 500,
            ack_timeout_ms: 500,
            response_timeout_ms: 500,
            max_retries: 0,
        }
    }
}

impl SerialLinkConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub actor_status_interval_ms: u64,
    pub arm_status_interval_ms: u64,
    pub scan_only_timeout_ms: u64,
    pub move_only_duration_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            actor_status_interval_ms: 1000,
            arm_status_interval_ms: 1000,
            scan_only_timeout_ms: 5000,
            move_only_duration_ms: 5000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BehaviourConfig {
    pub distance_stop_threshold_cm: f32,
    pub detection_center_tolerance: f32,
    pub detection_min_confidence: f32,
    pub max_arm_pick_attempts: u32,
    pub arm_ready_timeout_ms: u64,
    pub arm_pick_timeout_ms: u64,
}

impl Default for BehaviourConfig {
    fn default() -> Self {
        Self {
            distance_stop_threshold_cm: 30.0,
            detection_center_tolerance: 0.2,
            detection_min_confidence: 0.5,
            max_arm_pick_attempts: 3,
            arm_ready_timeout_ms: 2000,
            arm_pick_timeout_ms: 8000,
        }
    }
}

/// Root configuration for one control core. `actor_port` and `arm_port`
/// normally share the same physical path: actor and arm are multiplexed
/// over a single shared bus, per the half-duplex multi-drop design.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub actor_port: PortConfig,
    pub arm_port: PortConfig,
    pub serial_link: SerialLinkConfig,
    pub scheduler: SchedulerConfig,
    pub behaviour: BehaviourConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        let port = PortConfig::default();
        Self {
            actor_port: port.clone(),
            arm_port: port,
            serial_link: SerialLinkConfig::default(),
            scheduler: SchedulerConfig::default(),
            behaviour: BehaviourConfig::default(),
        }
    }
}
