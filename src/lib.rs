//! saltchannel - Salt Channel v2 protocol implementation
//!
//! A secure channel protocol with mutual authentication, forward secrecy
//! and a compact wire format, layered over any duplex frame transport.
//!
//! # Features
//!
//! - Full Salt Channel v2 handshake (M1-M4), client and server roles
//! - NaCl-compatible primitives (X25519, XSalsa20-Poly1305, Ed25519, SHA-512)
//! - A1/A2 protocol discovery and first-message sniffing
//! - App and MultiApp framing with orderly last-message close
//! - Optional relative timestamps for delayed-packet detection
//! - In-memory and length-prefixed TCP transports
//!
//! # Usage
//!
//! ```no_run
//! use saltchannel::{ExchangeKeyPair, SaltClient, SigKeyPair, TcpTransport};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), saltchannel::SaltChannelError> {
//!     let transport = TcpTransport::connect("127.0.0.1:2033".parse().unwrap()).await?;
//!     let client = SaltClient::new(transport, SigKeyPair::generate());
//!
//!     let mut channel = client.handshake(ExchangeKeyPair::generate(), None).await?;
//!     channel.send(false, &[b"hello"]).await?;
//!     let reply = channel.receive(Duration::from_secs(5)).await?;
//!     println!("{:?}", reply.message);
//!     channel.close().await;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod net;
pub mod protocol;
pub mod server;

pub use channel::{Received, SessionChannel};
pub use client::SaltClient;
pub use config::{SaltConfig, SessionConfig};
pub use crypto::{ExchangeKeyPair, SigKeyPair};
pub use error::{ErrorKind, SaltChannelError};
pub use net::{MemoryTransport, ReceiveEvent, TcpTransport, Transport};
pub use protocol::SessionState;
pub use server::{DiscoveryOutcome, SaltServer};
