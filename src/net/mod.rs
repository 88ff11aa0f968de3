//! Transport boundary
//!
//! The engine exchanges whole frames with a duplex, message-oriented
//! transport. Fragmentation and reassembly are the transport's job.

pub mod memory;
pub mod tcp;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ProtocolError, SaltChannelError, TransportError};

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

/// Outcome of a bounded receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveEvent {
    /// One complete frame
    Data(Vec<u8>),
    /// Nothing arrived within the wait time
    Timeout,
    /// The peer closed the transport
    Closed,
}

/// Async duplex frame transport
///
/// A session drives its transport from a single task. Closing the
/// transport unblocks a pending `receive` with `Closed`.
#[async_trait]
pub trait Transport: Send {
    /// Send one frame
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for one frame
    async fn receive(&mut self, timeout: Duration) -> Result<ReceiveEvent, TransportError>;

    /// Release the transport; safe to call more than once
    async fn close(&mut self);

    /// Check if the transport was closed by either side
    fn is_closed(&self) -> bool;

    /// Check if the transport is still establishing its connection
    fn is_connecting(&self) -> bool {
        false
    }
}

/// Receive one frame, mapping a timeout to a protocol error naming `packet`
pub(crate) async fn expect_frame<T: Transport + ?Sized>(
    transport: &mut T,
    timeout: Duration,
    packet: &'static str,
) -> Result<Vec<u8>, SaltChannelError> {
    match transport.receive(timeout).await? {
        ReceiveEvent::Data(frame) => Ok(frame),
        ReceiveEvent::Timeout => Err(ProtocolError::Timeout {
            packet,
            millis: timeout.as_millis() as u64,
        }
        .into()),
        ReceiveEvent::Closed => Err(TransportError::Closed.into()),
    }
}
