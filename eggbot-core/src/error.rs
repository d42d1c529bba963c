//! Crate-wide structured errors.
//!
//! Per the link-level error handling policy, command and status failures on
//! the actor/arm links surface as plain `bool`/`Option`, never as `Error`;
//! port-open and read/write failures are recovered locally by the bus's
//! reconnect loop and never surface here either. This type is reserved for
//! the engine's own start/stop lifecycle, the one place a caller must react
//! to a structural failure rather than a timeout.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("engine already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, Error>;
