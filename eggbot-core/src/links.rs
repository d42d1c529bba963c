//! Typed request/response wrappers around the shared bus (C3 actor link,
//! C4 arm link). Each link borrows a bus by reference count; it owns no
//! port of its own and registers its status listener at construction time,
//! matching the lifecycle notes in §3.

use crate::bus::SharedSerialBus;
use crate::codec::GROUP_STATUS;
use crate::config::SerialLinkConfig;
use crate::protocol::{
    self, ActorCommand, ActorStatus, ArmStatus, ACK_BYTE,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type StatusCallback<S> = Box<dyn Fn(S) + Send + Sync>;

/// Shared machinery between the actor and arm links: a cached last-seen
/// status plus an optional caller callback, updated from the bus's
/// broadcast listener.
struct StatusCache<S> {
    last: Mutex<Option<S>>,
    callback: Option<StatusCallback<S>>,
}

impl<S: Copy + Send + 'static> StatusCache<S> {
    fn new(callback: Option<StatusCallback<S>>) -> Arc<Self> {
        Arc::new(Self { last: Mutex::new(None), callback })
    }

    fn update(&self, status: S) {
        *self.last.lock().unwrap() = Some(status);
        if let Some(cb) = &self.callback {
            cb(status);
        }
    }

    fn last(&self) -> Option<S> {
        *self.last.lock().unwrap()
    }
}

/// The mobile chassis link. Commands are move-forward/backward/stop/turn;
/// status carries `is_moving` and an optional obstacle distance.
pub struct ActorLink {
    bus: Arc<SharedSerialBus>,
    config: SerialLinkConfig,
    cache: Arc<StatusCache<ActorStatus>>,
}

impl ActorLink {
    pub async fn new(
        bus: Arc<SharedSerialBus>,
        config: SerialLinkConfig,
        on_status: Option<StatusCallback<ActorStatus>>,
    ) -> Self {
        let cache = StatusCache::new(on_status);
        let listener_cache = Arc::clone(&cache);
        bus.register_listener(Box::new(move |frame| {
            if frame.group != GROUP_STATUS || !frame.crc_ok {
                return;
            }
            if let Some(status) = protocol::parse_actor_status(frame) {
                listener_cache.update(status);
            }
        }))
        .await;
        Self { bus, config, cache }
    }

    pub async fn start(&self) {
        self.bus.start().await;
    }

    pub async fn shutdown(&self) {
        self.bus.stop().await;
    }

    async fn command(&self, command: ActorCommand) -> bool {
        let frame = protocol::build_actor_command(command);
        self.bus
            .request(frame, Box::new(protocol::is_ack), self.config.ack_timeout())
            .await
            .is_some()
    }

    pub async fn move_forward(&self) -> bool {
        self.command(ActorCommand::MoveForward).await
    }

    pub async fn move_backward(&self) -> bool {
        self.command(ActorCommand::MoveBackward).await
    }

    pub async fn stop(&self) -> bool {
        self.command(ActorCommand::Stop).await
    }

    pub async fn turn_90(&self) -> bool {
        self.command(ActorCommand::Turn90).await
    }

    pub async fn read_status(&self) -> Option<ActorStatus> {
        let frame = protocol::build_actor_status_request();
        let response = self
            .bus
            .request(
                frame,
                Box::new(|frame| frame.group == GROUP_STATUS),
                self.config.response_timeout(),
            )
            .await?;
        let status = protocol::parse_actor_status(&response)?;
        self.cache.update(status);
        Some(status)
    }

    pub fn last_status(&self) -> Option<ActorStatus> {
        self.cache.last()
    }
}

/// The pick-and-place arm link. `pick` has no opcode byte of its own; its
/// payload is the (x_mm, y_mm) coordinate pair per §3.
pub struct ArmLink {
    bus: Arc<SharedSerialBus>,
    config: SerialLinkConfig,
    cache: Arc<StatusCache<ArmStatus>>,
}

impl ArmLink {
    pub async fn new(
        bus: Arc<SharedSerialBus>,
        config: SerialLinkConfig,
        on_status: Option<StatusCallback<ArmStatus>>,
    ) -> Self {
        let cache = StatusCache::new(on_status);
        let listener_cache = Arc::clone(&cache);
        bus.register_listener(Box::new(move |frame| {
            if frame.group != GROUP_STATUS || !frame.crc_ok {
                return;
            }
            if let Some(status) = protocol::parse_arm_status(frame) {
                listener_cache.update(status);
            }
        }))
        .await;
        Self { bus, config, cache }
    }

    pub async fn start(&self) {
        self.bus.start().await;
    }

    pub async fn shutdown(&self) {
        self.bus.stop().await;
    }

    pub async fn pick(&self, x_mm: f32, y_mm: f32) -> bool {
        let frame = protocol::build_arm_pick_command(x_mm, y_mm);
        self.bus
            .request(frame, Box::new(protocol::is_ack), self.config.ack_timeout())
            .await
            .is_some()
    }

    pub async fn read_status(&self) -> Option<ArmStatus> {
        let frame = protocol::build_arm_status_request();
        let response = self
            .bus
            .request(
                frame,
                Box::new(|frame| frame.group == GROUP_STATUS),
                self.config.response_timeout(),
            )
            .await?;
        let status = protocol::parse_arm_status(&response)?;
        self.cache.update(status);
        Some(status)
    }

    pub fn last_status(&self) -> Option<ArmStatus> {
        self.cache.last()
    }

    /// Repeatedly polls status until `is_busy` clears or `timeout` elapses.
    pub async fn wait_until_idle(&self, timeout: Duration, poll_interval: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(status) = self.read_status().await {
                if !status.is_busy {
                    return true;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::transport::{mock, PortConfig};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn bus_config() -> PortConfig {
        PortConfig {
            read_chunk_size: 64,
            read_timeout: Duration::from_millis(20),
            reconnect_delay: Duration::from_millis(20),
            ..Default::default()
        }
    }

    fn link_config() -> SerialLinkConfig {
        SerialLinkConfig {
            ack_timeout_ms: 100,
            response_timeout_ms: 100,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn move_forward_returns_true_on_ack() {
        let (opener, mut device) = mock::opener_pair();
        let bus = SharedSerialBus::new(bus_config(), opener);
        let link = ActorLink::new(Arc::clone(&bus), link_config(), None).await;
        link.start().await;
        tokio::time::advance(Duration::from_millis(1)).await;

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            device.read_exact(&mut buf).await.unwrap();
            let ack = codec::encode(&[codec::GROUP_COMMAND, ACK_BYTE], None);
            device.write_all(&ack).await.unwrap();
        });

        assert!(link.move_forward().await);
        responder.await.unwrap();
        link.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn move_forward_times_out_without_ack() {
        let (opener, _device) = mock::opener_pair();
        let bus = SharedSerialBus::new(bus_config(), opener);
        let link = ActorLink::new(Arc::clone(&bus), link_config(), None).await;
        link.start().await;
        tokio::time::advance(Duration::from_millis(1)).await;

        assert!(!link.move_forward().await);
        link.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn status_broadcast_updates_cache_without_a_pending_request() {
        let (opener, mut device) = mock::opener_pair();
        let bus = SharedSerialBus::new(bus_config(), opener);
        let link = ActorLink::new(Arc::clone(&bus), link_config(), None).await;
        link.start().await;
        tokio::time::advance(Duration::from_millis(1)).await;

        let status_frame = codec::encode(&[codec::GROUP_STATUS, 0x01, 0x32], None);
        device.write_all(&status_frame).await.unwrap();

        // Give the reader a chance to decode and dispatch.
        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(5)).await;
            tokio::task::yield_now().await;
        }

        let status = link.last_status().unwrap();
        assert!(status.is_moving);
        assert_eq!(status.distance_cm, Some(0x32));

        link.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn arm_pick_issues_framed_coordinates() {
        let (opener, mut device) = mock::opener_pair();
        let bus = SharedSerialBus::new(bus_config(), opener);
        let link = ArmLink::new(Arc::clone(&bus), link_config(), None).await;
        link.start().await;
        tokio::time::advance(Duration::from_millis(1)).await;

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            device.read_exact(&mut buf).await.unwrap();
            assert_eq!(u16::from_be_bytes([buf[4], buf[5]]), 240);
            assert_eq!(u16::from_be_bytes([buf[6], buf[7]]), 270);
            let ack = codec::encode(&[codec::GROUP_COMMAND, ACK_BYTE], None);
            device.write_all(&ack).await.unwrap();
        });

        assert!(link.pick(240.0, 270.0).await);
        responder.await.unwrap();
        link.shutdown().await;
    }
}
