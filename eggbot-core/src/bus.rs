//! The shared serial bus (C2): owns one transport, extracts frames on a
//! single reader task, and correlates responses to waiting requesters or
//! fans them out to broadcast listeners.
//!
//! The "write mutex" and "single reader task" from the design are realized
//! with an actor-style split: the reader task owns the read half and drives
//! reconnection; writes go through a mutex-guarded write half so callers
//! never race each other on the wire. Listener/pending-wait bookkeeping
//! lives behind its own lock so registration works whether or not the
//! reader task happens to be running, matching the source's behavior of
//! registering listeners at construction time regardless of bus lifecycle.

use crate::codec::{self, DecodedFrame};
use crate::transport::{PortConfig, PortOpener, SerialTransport};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type Predicate = Box<dyn Fn(&DecodedFrame) -> bool + Send + 'static>;
pub type Listener = Box<dyn Fn(&DecodedFrame) + Send + 'static>;

struct PendingWait {
    predicate: Predicate,
    responder: Option<oneshot::Sender<DecodedFrame>>,
}

#[derive(Default)]
struct BusRuntime {
    listeners: Vec<(u64, Listener)>,
    waits: Vec<(u64, PendingWait)>,
    next_id: u64,
    usage_count: usize,
    task: Option<(JoinHandle<()>, CancellationToken)>,
}

pub struct SharedSerialBus {
    config: PortConfig,
    opener: PortOpener,
    state: Mutex<BusRuntime>,
    write_half: Mutex<Option<WriteHalf<Box<dyn SerialTransport>>>>,
}

impl SharedSerialBus {
    pub fn new(config: PortConfig, opener: PortOpener) -> Arc<Self> {
        Arc::new(Self {
            config,
            opener,
            state: Mutex::new(BusRuntime::default()),
            write_half: Mutex::new(None),
        })
    }

    /// 0→1 transition starts the reader task; subsequent calls just bump
    /// the reference count.
    pub async fn start(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        state.usage_count += 1;
        if state.usage_count == 1 {
            self.spawn_reader(&mut state);
        }
    }

    /// 1→0 transition stops the reader task. Calling `stop` more times than
    /// `start` is a no-op rather than a panic; owners shut down
    /// independently and shouldn't have to track each other's state.
    pub async fn stop(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if state.usage_count == 0 {
            return;
        }
        state.usage_count -= 1;
        if state.usage_count == 0 {
            Self::stop_reader(&mut state).await;
        }
    }

    /// Force-stops regardless of usage count.
    pub async fn shutdown(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        state.usage_count = 0;
        Self::stop_reader(&mut state).await;
    }

    pub async fn register_listener(&self, listener: Listener) -> u64 {
        let mut state = self.state.lock().await;
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.push((id, listener));
        id
    }

    pub async fn unregister_listener(&self, id: u64) {
        let mut state = self.state.lock().await;
        state.listeners.retain(|(lid, _)| *lid != id);
    }

    pub async fn send_frame(&self, frame: Vec<u8>) -> std::io::Result<()> {
        let mut guard = self.write_half.lock().await;
        match guard.as_mut() {
            Some(writer) => {
                writer.write_all(&frame).await?;
                writer.flush().await
            }
            None => Err(std::io::Error::other("serial bus is not connected")),
        }
    }

    /// Registers a wait, writes the frame, and blocks up to `timeout` for a
    /// frame whose predicate matches. Never errors: I/O failure and timeout
    /// both surface as `None`, per the link-level error policy.
    pub async fn request(
        &self,
        frame: Vec<u8>,
        predicate: Predicate,
        timeout: std::time::Duration,
    ) -> Option<DecodedFrame> {
        let (wait_id, rx) = self.register_wait(predicate).await;
        if self.send_frame(frame).await.is_err() {
            self.cancel_wait(wait_id).await;
            return None;
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(frame)) => Some(frame),
            _ => {
                self.cancel_wait(wait_id).await;
                None
            }
        }
    }

    async fn register_wait(&self, predicate: Predicate) -> (u64, oneshot::Receiver<DecodedFrame>) {
        let mut state = self.state.lock().await;
        let id = state.next_id;
        state.next_id += 1;
        let (tx, rx) = oneshot::channel();
        state.waits.push((
            id,
            PendingWait {
                predicate,
                responder: Some(tx),
            },
        ));
        (id, rx)
    }

    async fn cancel_wait(&self, id: u64) {
        let mut state = self.state.lock().await;
        state.waits.retain(|(wid, _)| *wid != id);
    }

    fn spawn_reader(self: &Arc<Self>, state: &mut BusRuntime) {
        let bus = Arc::clone(self);
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move { bus.reader_loop(child).await });
        state.task = Some((handle, token));
    }

    async fn stop_reader(state: &mut BusRuntime) {
        if let Some((handle, token)) = state.task.take() {
            token.cancel();
            let _ = handle.await;
        }
    }

    async fn connect_with_retry(
        &self,
        cancellation: &CancellationToken,
    ) -> Option<Box<dyn SerialTransport>> {
        loop {
            match (self.opener)(&self.config) {
                Ok(transport) => return Some(transport),
                Err(error) => {
                    tracing::warn!(path = %self.config.path, %error, "failed to open serial port, retrying");
                    tokio::select! {
                        _ = cancellation.cancelled() => return None,
                        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                    }
                }
            }
        }
    }

    async fn dispatch_frame(&self, frame: DecodedFrame) {
        let mut state = self.state.lock().await;
        if let Some(pos) = state.waits.iter().position(|(_, w)| (w.predicate)(&frame)) {
            let (_, mut wait) = state.waits.remove(pos);
            if let Some(responder) = wait.responder.take() {
                let _ = responder.send(frame);
            }
            return;
        }
        for (_, listener) in state.listeners.iter() {
            listener(&frame);
        }
    }

    async fn reader_loop(self: Arc<Self>, cancellation: CancellationToken) {
        let mut buffer = Vec::new();
        while !cancellation.is_cancelled() {
            let Some(transport) = self.connect_with_retry(&cancellation).await else {
                break;
            };
            tracing::info!(path = %self.config.path, "serial port connected");
            let (mut read_half, write_half) = tokio::io::split(transport);
            *self.write_half.lock().await = Some(write_half);

            let mut chunk = vec![0u8; self.config.read_chunk_size.max(1)];
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    result = tokio::time::timeout(self.config.read_timeout, read_half.read(&mut chunk)) => {
                        match result {
                            Ok(Ok(0)) => {
                                tracing::warn!("serial port reached EOF, reconnecting");
                                break;
                            }
                            Ok(Ok(n)) => {
                                buffer.extend_from_slice(&chunk[..n]);
                                for frame in codec::extract_frames(&mut buffer) {
                                    self.dispatch_frame(frame).await;
                                }
                            }
                            Ok(Err(error)) => {
                                tracing::warn!(%error, "serial read error, reconnecting");
                                break;
                            }
                            Err(_elapsed) => {
                                // Ordinary per-read timeout; not a fault.
                            }
                        }
                    }
                }
            }

            *self.write_half.lock().await = None;
        }
    }
}
