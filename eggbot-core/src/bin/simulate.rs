//! Demonstration driver that wires the control core up to the in-memory
//! mock transport and a synthetic detection feed read from stdin (one JSON
//! `Detection` per line). Camera capture, model inference, and real
//! hardware wiring are all out of this crate's scope (§1) — this binary
//! exists to exercise the bus/engine stack interactively without hardware.

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use eggbot_core::bus::SharedSerialBus;
use eggbot_core::codec;
use eggbot_core::config::ControlConfig;
use eggbot_core::engine::ControlEngine;
use eggbot_core::events::ControlEvent;
use eggbot_core::links::{ActorLink, ArmLink};
use eggbot_core::protocol::ACK_BYTE;
use eggbot_core::transport::{mock, PortConfig};
use eggbot_core::types::{Detection, FrameData};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (opener, mut device) = mock::opener_pair();
    let bus = SharedSerialBus::new(PortConfig::default(), opener);
    let config = ControlConfig::default();

    let actor = Arc::new(ActorLink::new(Arc::clone(&bus), config.serial_link.clone(), None).await);
    let arm = Arc::new(ArmLink::new(Arc::clone(&bus), config.serial_link.clone(), None).await);

    // Stand in for the two physical endpoints: ACK every command so the
    // demonstration can progress through the patrol/pick cycle without
    // real hardware attached.
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 64];
        loop {
            match device.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
            for frame in codec::extract_frames(&mut buf) {
                if frame.group == codec::GROUP_COMMAND {
                    let ack = codec::encode(&[codec::GROUP_COMMAND, ACK_BYTE], None);
                    if device.write_all(&ack).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    let (mut engine, receiver) = ControlEngine::new(actor, arm, config).await;
    let events = engine.events();
    engine.start(receiver).await?;

    tracing::info!("control engine running; feed JSON `Detection` lines on stdin, ctrl-d to stop");

    let detection_feed = tokio::task::spawn_blocking(move || -> Result<()> {
        let stdin = std::io::stdin();
        let mut frame_id = 0u64;
        for line in stdin.lock().lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let detection: Detection = serde_json::from_str(&line)?;
            frame_id += 1;
            events.publish(ControlEvent::Detection {
                detections: vec![detection],
                frame: FrameData {
                    image_width: 640,
                    image_height: 480,
                    frame_id,
                    timestamp: std::time::SystemTime::now(),
                    pixels: Vec::new(),
                },
            });
        }
        Ok(())
    });

    tokio::select! {
        result = detection_feed => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {}
    }

    tracing::info!("shutting down");
    tokio::time::sleep(Duration::from_millis(10)).await;
    engine.stop().await?;
    Ok(())
}
