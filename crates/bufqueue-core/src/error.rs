//! Error types for bufqueue

use crate::listener::Api;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Bad dimensions, format, slot index or buffer count (BAD_VALUE).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} is not connected")]
    NotConnected(&'static str),

    #[error("connected to another api (current={current:?}, requested={requested:?})")]
    WrongConnection {
        current: Option<Api>,
        requested: Api,
    },

    /// Non-blocking dequeue found no free slot.
    #[error("operation would block")]
    WouldBlock,

    #[error("no memory: {0}")]
    NoMemory(String),

    /// Slot no longer matches the caller's frame number or generation.
    #[error("stale buffer slot {slot}")]
    StaleBufferSlot { slot: usize },

    /// The call raced with a producer disconnect.
    #[error("producer disconnected while the call was in flight")]
    Disconnected,

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The queue instance has been abandoned (NO_INIT).
    #[error("buffer queue has been abandoned")]
    Abandoned,

    /// Internal accounting invariant violated; the queue is abandoned.
    #[error("internal invariant violated: {0}")]
    Fatal(String),

    #[error("access denied: buffer is mapped read-only")]
    ReadOnly,

    #[error("shared memory error: {0}")]
    SharedMemory(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("transport closed")]
    TransportClosed,
}

impl Error {
    /// Errors that callers may treat as a no-op.
    pub fn is_benign(&self) -> bool {
        matches!(self, Error::StaleBufferSlot { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
