//! Framed transport halves used by the stream relay.
//!
//! A framed transport (e.g. a WebSocket) is split into a [`FrameSource`] and a
//! [`FrameSink`] so that each relay direction owns exactly one half.

use crate::error::VmResult;
use futures_util::future::BoxFuture;

/// One message received from a framed transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Relay payload.
    Binary(Vec<u8>),
    /// Text payload; never forwarded.
    Text(String),
    /// Ping/pong and other transport-level frames.
    Control,
}

/// Receiving half of a framed transport.
pub trait FrameSource: Send {
    /// Next frame, or `None` once the peer has closed.
    fn recv(&mut self) -> BoxFuture<'_, VmResult<Option<Frame>>>;
}

/// Sending half of a framed transport.
pub trait FrameSink: Send {
    /// Send `data` as a single binary frame.
    fn send_binary(&mut self, data: Vec<u8>) -> BoxFuture<'_, VmResult<()>>;

    /// Close the transport. Must succeed (or be harmless) if already closed.
    fn close(&mut self) -> BoxFuture<'_, VmResult<()>>;
}
