//! A1/A2 protocol discovery and first-message sniffing
//!
//! A server listening on a shared endpoint looks at the first inbound
//! frame: an A1 gets an A2 listing the supported protocols, anything else
//! is matched against the protocol identifiers by prefix.

use crate::error::ProtocolError;
use crate::protocol::messages::{AddressType, PacketType, ProtocolEntry, A1, A2};

/// Protocol identifier every Salt Channel v2 M1 starts with
pub const SALT_CHANNEL_PROTOCOL: &str = "SCv2";

/// What the first inbound frame turned out to be
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// An A1 discovery request
    Discovery(A1),
    /// The first message of the named protocol
    Protocol(&'a str),
}

/// Build the client's A1, optionally addressed to a server signature key
pub fn build_request(address: Option<[u8; 32]>) -> Vec<u8> {
    match address {
        Some(key) => A1::with_pub(key).to_bytes(),
        None => A1::any().to_bytes(),
    }
}

/// Parse the server's A2
pub fn parse_response(data: &[u8]) -> Result<Vec<ProtocolEntry>, ProtocolError> {
    A2::from_bytes(data).map(|a2| a2.entries)
}

/// Classify the first inbound frame on a server endpoint
///
/// First matching protocol wins.
pub fn classify<'a, S: AsRef<str>>(
    protocols: &'a [S],
    message: &[u8],
) -> Result<Inbound<'a>, ProtocolError> {
    if message.starts_with(&PacketType::A1.header()) {
        return A1::from_bytes(message).map(Inbound::Discovery);
    }

    protocols
        .iter()
        .map(AsRef::as_ref)
        .find(|protocol| !protocol.is_empty() && message.starts_with(protocol.as_bytes()))
        .map(Inbound::Protocol)
        .ok_or_else(|| ProtocolError::UnknownProtocol {
            prefix: hex::encode(&message[..message.len().min(10)]),
        })
}

/// Build the A2 answering `request`
///
/// A request for a `pub` address other than `own_sig_key` fails with
/// `NoSuchServer`; the caller replies with `A2::no_such_server_bytes`.
pub fn build_response<S: AsRef<str>>(
    protocols: &[S],
    request: &A1,
    own_sig_key: &[u8; 32],
) -> Result<Vec<u8>, ProtocolError> {
    match request.address_type {
        AddressType::Any => {}
        AddressType::Pub if request.address[..] == own_sig_key[..] => {}
        AddressType::Pub => return Err(ProtocolError::NoSuchServer { packet: "A1" }),
    }

    Ok(A2::from_protocols(protocols)?.to_bytes())
}
