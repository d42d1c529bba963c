//! The byte-stream abstraction the shared bus drives, and its physical
//! configuration. Kept separate from `tokio_serial::SerialStream` so the bus
//! can be driven deterministically in tests against an in-memory duplex pair.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;

pub trait SerialTransport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> SerialTransport for T {}

#[derive(Debug, Clone)]
pub struct PortConfig {
    pub path: String,
    pub baud_rate: u32,
    pub parity: tokio_serial::Parity,
    pub stop_bits: tokio_serial::StopBits,
    pub read_timeout: Duration,
    pub read_chunk_size: usize,
    pub reconnect_delay: Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            path: "COM15".to_string(),
            baud_rate: 115_200,
            parity: tokio_serial::Parity::None,
            stop_bits: tokio_serial::StopBits::One,
            read_timeout: Duration::from_millis(100),
            read_chunk_size: 1,
            reconnect_delay: Duration::from_millis(500),
        }
    }
}

/// Opens the physical transport named by `config`. The bus calls this once
/// per connection attempt and retries after `reconnect_delay` on failure.
pub fn open_real(config: &PortConfig) -> std::io::Result<Box<dyn SerialTransport>> {
    let port = tokio_serial::new(&config.path, config.baud_rate)
        .parity(config.parity)
        .stop_bits(config.stop_bits)
        .data_bits(tokio_serial::DataBits::Eight)
        .open_native_async()?;
    Ok(Box::new(port))
}

pub type PortOpener = Box<dyn Fn(&PortConfig) -> std::io::Result<Box<dyn SerialTransport>> + Send + Sync>;

pub fn real_opener() -> PortOpener {
    Box::new(open_real)
}

/// An in-memory duplex-backed transport, usable both by unit tests and by
/// the `eggbot-simulate` demonstration binary, which has no physical port
/// to open.
pub mod mock {
    use super::*;
    use tokio::io::DuplexStream;

    /// Hands back one end of an in-memory duplex pair as the transport and
    /// keeps the other end so a test can act as the "device".
    pub fn opener_pair() -> (PortOpener, DuplexStream) {
        let (a, b) = tokio::io::duplex(4096);
        let slot = std::sync::Mutex::new(Some(a));
        let opener: PortOpener = Box::new(move |_config| {
            slot.lock()
                .unwrap()
                .take()
                .map(|s| Box::new(s) as Box<dyn SerialTransport>)
                .ok_or_else(|| std::io::Error::other("mock transport already opened"))
        });
        (opener, b)
    }
}
