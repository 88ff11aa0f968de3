//! TCP transport with length-prefixed frames
//!
//! Each frame is sent as a 4-byte little-endian length followed by the
//! frame bytes.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};

use crate::error::TransportError;
use crate::net::{ReceiveEvent, Transport};

/// Size of the length prefix
pub const FRAME_HEADER_SIZE: usize = 4;

/// Default upper bound on a single frame
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// Default read buffer size
const READ_BUFFER_SIZE: usize = 8192;

/// Connection timeout
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Salt Channel frames over a TCP stream
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    /// Bytes read but not yet returned as a frame
    pending: Vec<u8>,
    read_buffer: Vec<u8>,
    max_frame: usize,
    peer_addr: SocketAddr,
    closed: bool,
}

impl TcpTransport {
    /// Wrap an accepted or connected stream
    pub fn new(stream: TcpStream) -> Result<Self, TransportError> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            pending: Vec::new(),
            read_buffer: vec![0u8; READ_BUFFER_SIZE],
            max_frame: DEFAULT_MAX_FRAME,
            peer_addr,
            closed: false,
        })
    }

    /// Connect to a Salt Channel server
    pub async fn connect(addr: SocketAddr) -> Result<Self, TransportError> {
        let stream = timeout(CONNECTION_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::ConnectFailed {
                endpoint: addr.to_string(),
                reason: format!("no answer within {:?}", CONNECTION_TIMEOUT),
            })?
            .map_err(|e| TransportError::ConnectFailed {
                endpoint: addr.to_string(),
                reason: e.to_string(),
            })?;

        Self::new(stream)
    }

    /// Override the largest accepted frame
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Split one complete frame off the front of the pending bytes
    fn take_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.pending.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&self.pending[..FRAME_HEADER_SIZE]);
        let len = u32::from_le_bytes(header) as usize;
        if len > self.max_frame {
            return Err(TransportError::FrameTooLarge {
                len,
                max: self.max_frame,
            });
        }

        if self.pending.len() < FRAME_HEADER_SIZE + len {
            return Ok(None);
        }

        let frame = self.pending[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len].to_vec();
        self.pending.drain(..FRAME_HEADER_SIZE + len);
        Ok(Some(frame))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if frame.len() > self.max_frame {
            return Err(TransportError::FrameTooLarge {
                len: frame.len(),
                max: self.max_frame,
            });
        }

        let mut bytes = Vec::with_capacity(FRAME_HEADER_SIZE + frame.len());
        bytes.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        bytes.extend_from_slice(frame);

        self.stream.write_all(&bytes).await?;
        Ok(())
    }

    async fn receive(&mut self, wait: Duration) -> Result<ReceiveEvent, TransportError> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(frame) = self.take_frame()? {
                return Ok(ReceiveEvent::Data(frame));
            }
            if self.closed {
                return Ok(ReceiveEvent::Closed);
            }

            // read() is cancel safe, so a timeout never loses bytes
            let n = match timeout_at(deadline, self.stream.read(&mut self.read_buffer)).await {
                Err(_) => return Ok(ReceiveEvent::Timeout),
                Ok(result) => result?,
            };

            if n == 0 {
                tracing::debug!("Peer {} closed the connection", self.peer_addr);
                self.closed = true;
                return Ok(ReceiveEvent::Closed);
            }

            self.pending.extend_from_slice(&self.read_buffer[..n]);
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!("Shutdown of {} failed: {}", self.peer_addr, e);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
