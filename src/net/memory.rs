//! In-memory transport pair
//!
//! Two connected endpoints backed by unbounded channels. Used for tests,
//! the self-test binary and for hosting sessions inside one process.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::net::{ReceiveEvent, Transport};

/// One end of an in-memory duplex connection
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    peer_closed: bool,
}

impl MemoryTransport {
    /// Create two connected endpoints
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();

        (
            Self {
                tx: Some(a_tx),
                rx: a_rx,
                peer_closed: false,
            },
            Self {
                tx: Some(b_tx),
                rx: b_rx,
                peer_closed: false,
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame.to_vec()).map_err(|_| TransportError::Closed)
    }

    async fn receive(&mut self, timeout: Duration) -> Result<ReceiveEvent, TransportError> {
        if self.tx.is_none() {
            return Ok(ReceiveEvent::Closed);
        }

        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(frame)) => Ok(ReceiveEvent::Data(frame)),
            Ok(None) => {
                self.peer_closed = true;
                Ok(ReceiveEvent::Closed)
            }
            Err(_) => Ok(ReceiveEvent::Timeout),
        }
    }

    async fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }

    fn is_closed(&self) -> bool {
        self.tx.is_none() || self.peer_closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let (mut a, mut b) = MemoryTransport::pair();

        a.send(b"one").await.unwrap();
        a.send(b"two").await.unwrap();

        let wait = Duration::from_millis(50);
        assert_eq!(b.receive(wait).await.unwrap(), ReceiveEvent::Data(b"one".to_vec()));
        assert_eq!(b.receive(wait).await.unwrap(), ReceiveEvent::Data(b"two".to_vec()));
        assert_eq!(b.receive(wait).await.unwrap(), ReceiveEvent::Timeout);
    }

    #[tokio::test]
    async fn test_close_is_seen_by_peer() {
        let (mut a, mut b) = MemoryTransport::pair();

        a.send(b"before close").await.unwrap();
        a.close().await;
        a.close().await;
        assert!(a.is_closed());
        assert!(a.send(b"after").await.is_err());

        let wait = Duration::from_millis(50);
        // frames sent before closing are still delivered
        assert_eq!(
            b.receive(wait).await.unwrap(),
            ReceiveEvent::Data(b"before close".to_vec())
        );
        assert_eq!(b.receive(wait).await.unwrap(), ReceiveEvent::Closed);
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn test_dropped_peer_reads_as_closed() {
        let (a, mut b) = MemoryTransport::pair();
        drop(a);

        assert_eq!(
            b.receive(Duration::from_millis(50)).await.unwrap(),
            ReceiveEvent::Closed
        );
        assert!(b.send(b"x").await.is_err());
    }
}
