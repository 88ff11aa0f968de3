//! Salt Channel v2 message wire formats
//!
//! Defines the packet structures for:
//! - Type 1: M1, client hello (42 or 74 bytes)
//! - Type 2: M2, server hello (38 bytes)
//! - Type 3: M3, server authentication (102 bytes, sent encrypted)
//! - Type 4: M4, client authentication (102 bytes, sent encrypted)
//! - Type 5: App, one application message
//! - Type 6: Encrypted envelope
//! - Type 8/9: A1/A2 protocol discovery
//! - Type 11: MultiApp, several application messages
//!
//! All integers are little-endian. Every packet starts with a two-byte
//! header `type | flags`, except M1 which is prefixed by the version string.

use crate::error::ProtocolError;

/// Protocol version prefix of M1
pub const VERSION: [u8; 4] = *b"SCv2";

/// Signature domain separation for M3
pub const SIG1_PREFIX: [u8; 8] = *b"SC-SIG01";

/// Signature domain separation for M4
pub const SIG2_PREFIX: [u8; 8] = *b"SC-SIG02";

/// Header flag marking the last message of a session (Encrypted) or the
/// final A2 packet
pub const LAST_FLAG: u8 = 0x80;

/// Header flag bit set by servers that do not own the requested identity
pub const NO_SUCH_SERVER_FLAG: u8 = 0x01;

/// Largest application message, bounded by the MultiApp length field
pub const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

/// Largest number of messages in one MultiApp packet
pub const MAX_MESSAGE_COUNT: usize = u16::MAX as usize;

/// Length of a protocol identifier in A2
pub const PROTOCOL_ID_LEN: usize = 10;

/// Largest number of protocol entries in A2
pub const MAX_PROTOCOLS: usize = 127;

/// Salt Channel packet types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    M1 = 1,
    M2 = 2,
    M3 = 3,
    M4 = 4,
    App = 5,
    Encrypted = 6,
    A1 = 8,
    A2 = 9,
    MultiApp = 11,
}

impl PacketType {
    /// Packet name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Self::M1 => "M1",
            Self::M2 => "M2",
            Self::M3 => "M3",
            Self::M4 => "M4",
            Self::App => "AppPacket",
            Self::Encrypted => "EncryptedMessage",
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::MultiApp => "MultiAppPacket",
        }
    }

    /// Header with no flags set
    pub fn header(self) -> [u8; 2] {
        [self as u8, 0]
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::M1),
            2 => Ok(Self::M2),
            3 => Ok(Self::M3),
            4 => Ok(Self::M4),
            5 => Ok(Self::App),
            6 => Ok(Self::Encrypted),
            8 => Ok(Self::A1),
            9 => Ok(Self::A2),
            11 => Ok(Self::MultiApp),
            _ => Err(ProtocolError::Malformed {
                packet: "Packet",
                reason: format!("unknown packet type {}", value),
            }),
        }
    }
}

fn read_header(packet: &'static str, data: &[u8]) -> Result<[u8; 2], ProtocolError> {
    match data {
        [first, second, ..] => Ok([*first, *second]),
        _ => Err(ProtocolError::InvalidLength {
            packet,
            expected: 2,
            got: data.len(),
        }),
    }
}

fn expect_header(packet: &'static str, data: &[u8], expected: [u8; 2]) -> Result<(), ProtocolError> {
    let got = read_header(packet, data)?;
    if got != expected {
        return Err(ProtocolError::BadHeader {
            packet,
            expected: vec![expected],
            got,
        });
    }
    Ok(())
}

fn expect_len(packet: &'static str, data: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if data.len() != expected {
        return Err(ProtocolError::InvalidLength {
            packet,
            expected,
            got: data.len(),
        });
    }
    Ok(())
}

fn read_u32(data: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[..4]);
    u32::from_le_bytes(bytes)
}

fn read_u16(data: &[u8]) -> u16 {
    u16::from_le_bytes([data[0], data[1]])
}

fn read_key(data: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    key.copy_from_slice(&data[..32]);
    key
}

/// M1: client hello
///
/// ```text
/// version(4) "SCv2" | type(1)=1 | flags(1) | time(4) | client_ephemeral(32) |
/// [server_sig_key(32)]    present iff flags bit 0
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct M1 {
    pub time: u32,
    pub client_ephemeral: [u8; 32],
    pub server_sig_key: Option<[u8; 32]>,
}

impl M1 {
    /// Size without a server key hint
    pub const SIZE: usize = 42;

    /// Size with a server key hint
    pub const SIZE_WITH_HINT: usize = 74;

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE_WITH_HINT);

        buf.extend_from_slice(&VERSION);
        buf.push(PacketType::M1 as u8);
        buf.push(u8::from(self.server_sig_key.is_some()));
        buf.extend_from_slice(&self.time.to_le_bytes());
        buf.extend_from_slice(&self.client_ephemeral);
        if let Some(key) = &self.server_sig_key {
            buf.extend_from_slice(key);
        }

        buf
    }

    /// Parse from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < Self::SIZE {
            return Err(ProtocolError::InvalidLength {
                packet: "M1",
                expected: Self::SIZE,
                got: data.len(),
            });
        }

        if data[..4] != VERSION {
            return Err(ProtocolError::Malformed {
                packet: "M1",
                reason: format!("bad version {:02x?}, expected {:02x?}", &data[..4], VERSION),
            });
        }

        if data[4] != PacketType::M1 as u8 {
            return Err(ProtocolError::Malformed {
                packet: "M1",
                reason: format!("message type {}, expected {}", data[4], PacketType::M1 as u8),
            });
        }

        let has_hint = match data[5] {
            0 => false,
            1 => true,
            value => return Err(ProtocolError::InvalidAddressType { value }),
        };

        let expected = if has_hint { Self::SIZE_WITH_HINT } else { Self::SIZE };
        expect_len("M1", data, expected)?;

        Ok(Self {
            time: read_u32(&data[6..10]),
            client_ephemeral: read_key(&data[10..42]),
            server_sig_key: has_hint.then(|| read_key(&data[42..74])),
        })
    }
}

/// M2: server hello
///
/// ```text
/// type(1)=2 | flags(1) | time(4) | server_ephemeral(32)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct M2 {
    pub time: u32,
    pub server_ephemeral: [u8; 32],
}

impl M2 {
    /// Size of M2
    pub const SIZE: usize = 38;

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);

        buf.extend_from_slice(&PacketType::M2.header());
        buf.extend_from_slice(&self.time.to_le_bytes());
        buf.extend_from_slice(&self.server_ephemeral);

        buf
    }

    /// M2 telling the client that the requested server identity is unknown
    pub fn no_such_server_bytes() -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        buf[0] = PacketType::M2 as u8;
        buf[1] = LAST_FLAG | NO_SUCH_SERVER_FLAG;
        buf
    }

    /// Parse from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        let header = read_header("M2", data)?;
        if header[0] != PacketType::M2 as u8 {
            return Err(ProtocolError::BadHeader {
                packet: "M2",
                expected: vec![PacketType::M2.header(), [2, LAST_FLAG | NO_SUCH_SERVER_FLAG]],
                got: header,
            });
        }
        match header[1] {
            0 => {}
            flags if flags & NO_SUCH_SERVER_FLAG != 0 || flags == LAST_FLAG => {
                return Err(ProtocolError::NoSuchServer { packet: "M2" });
            }
            _ => {
                return Err(ProtocolError::BadHeader {
                    packet: "M2",
                    expected: vec![PacketType::M2.header(), [2, LAST_FLAG | NO_SUCH_SERVER_FLAG]],
                    got: header,
                });
            }
        }

        expect_len("M2", data, Self::SIZE)?;

        Ok(Self {
            time: read_u32(&data[2..6]),
            server_ephemeral: read_key(&data[6..38]),
        })
    }
}

/// Signed authentication message, shared layout of M3 and M4
///
/// ```text
/// type(1) | flags(1)=0 | time(4) | sig_key(32) | signature(64)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthMessage {
    pub time: u32,
    pub sig_key: [u8; 32],
    pub signature: [u8; 64],
}

impl AuthMessage {
    /// Size of M3 and M4
    pub const SIZE: usize = 102;

    /// Serialize as `packet_type` (M3 or M4)
    pub fn to_bytes(&self, packet_type: PacketType) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);

        buf.extend_from_slice(&packet_type.header());
        buf.extend_from_slice(&self.time.to_le_bytes());
        buf.extend_from_slice(&self.sig_key);
        buf.extend_from_slice(&self.signature);

        buf
    }

    /// Parse a packet of the given type (M3 or M4)
    pub fn from_bytes(packet_type: PacketType, data: &[u8]) -> Result<Self, ProtocolError> {
        let packet = packet_type.name();
        expect_header(packet, data, packet_type.header())?;
        expect_len(packet, data, Self::SIZE)?;

        let mut signature = [0u8; 64];
        signature.copy_from_slice(&data[38..102]);

        Ok(Self {
            time: read_u32(&data[2..6]),
            sig_key: read_key(&data[6..38]),
            signature,
        })
    }
}

/// Address type in A1
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Any = 0,
    Pub = 1,
}

/// A1: protocol discovery request
///
/// ```text
/// type(1)=8 | flags(1)=0 | address_type(1) | address_len(2) | address(n)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct A1 {
    pub address_type: AddressType,
    pub address: Vec<u8>,
}

impl A1 {
    /// Header plus address type and length
    pub const MIN_SIZE: usize = 5;

    /// Request without a specific address
    pub fn any() -> Self {
        Self {
            address_type: AddressType::Any,
            address: Vec::new(),
        }
    }

    /// Request addressed to a server signature key
    pub fn with_pub(key: [u8; 32]) -> Self {
        Self {
            address_type: AddressType::Pub,
            address: key.to_vec(),
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::MIN_SIZE + self.address.len());

        buf.extend_from_slice(&PacketType::A1.header());
        buf.push(self.address_type as u8);
        buf.extend_from_slice(&(self.address.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.address);

        buf
    }

    /// Parse from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        expect_header("A1", data, PacketType::A1.header())?;
        if data.len() < Self::MIN_SIZE {
            return Err(ProtocolError::InvalidLength {
                packet: "A1",
                expected: Self::MIN_SIZE,
                got: data.len(),
            });
        }

        let address_type = match data[2] {
            0 => AddressType::Any,
            1 => AddressType::Pub,
            value => {
                return Err(ProtocolError::Malformed {
                    packet: "A1",
                    reason: format!("unsupported address type {}", value),
                })
            }
        };

        let len = read_u16(&data[3..5]) as usize;
        if address_type == AddressType::Any && len != 0 {
            return Err(ProtocolError::Malformed {
                packet: "A1",
                reason: format!("address type any with {} address bytes", len),
            });
        }
        expect_len("A1", data, Self::MIN_SIZE + len)?;

        Ok(Self {
            address_type,
            address: data[Self::MIN_SIZE..].to_vec(),
        })
    }
}

/// One supported protocol advertised in A2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolEntry {
    pub p1: String,
    pub p2: String,
}

/// Check that a byte is allowed in an A2 protocol identifier: `[A-Za-z0-9_-]`
///
/// `.` and `/` are excluded even though they sit between `-` and `9`.
pub fn is_protocol_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_'
}

/// Pad a protocol identifier with `-` to exactly ten characters
pub fn pad_protocol(protocol: &str) -> Result<[u8; PROTOCOL_ID_LEN], ProtocolError> {
    let bytes = protocol.as_bytes();
    if bytes.len() > PROTOCOL_ID_LEN {
        return Err(ProtocolError::Malformed {
            packet: "A2",
            reason: format!("protocol identifier too long: {} bytes", bytes.len()),
        });
    }
    if let Some(&byte) = bytes.iter().find(|&&b| !is_protocol_char(b)) {
        return Err(ProtocolError::InvalidProtocolChar {
            packet: "A2",
            field: "p1",
            byte,
        });
    }

    let mut padded = [b'-'; PROTOCOL_ID_LEN];
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(padded)
}

/// A2: protocol discovery response
///
/// ```text
/// type(1)=9 | flags(1) | count(1) | count * (p1(10) | p2(10))
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct A2 {
    pub entries: Vec<ProtocolEntry>,
}

impl A2 {
    /// Size of header and count
    pub const HEADER_SIZE: usize = 3;

    /// Size of one protocol entry
    pub const ENTRY_SIZE: usize = 2 * PROTOCOL_ID_LEN;

    /// Build an A2 advertising `protocols`, each padded to ten characters
    /// and paired with a `----------` extra field
    pub fn from_protocols<S: AsRef<str>>(protocols: &[S]) -> Result<Self, ProtocolError> {
        if protocols.is_empty() || protocols.len() > MAX_PROTOCOLS {
            return Err(ProtocolError::Malformed {
                packet: "A2",
                reason: format!("count must be in range [1, 127], was {}", protocols.len()),
            });
        }

        let entries = protocols
            .iter()
            .map(|p| {
                let padded = pad_protocol(p.as_ref())?;
                Ok(ProtocolEntry {
                    p1: String::from_utf8_lossy(&padded).into_owned(),
                    p2: "-".repeat(PROTOCOL_ID_LEN),
                })
            })
            .collect::<Result<Vec<_>, ProtocolError>>()?;

        Ok(Self { entries })
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::HEADER_SIZE + self.entries.len() * Self::ENTRY_SIZE);

        buf.push(PacketType::A2 as u8);
        buf.push(LAST_FLAG);
        buf.push(self.entries.len() as u8);
        for entry in &self.entries {
            buf.extend_from_slice(entry.p1.as_bytes());
            buf.extend_from_slice(entry.p2.as_bytes());
        }

        buf
    }

    /// A2 telling the client that the requested address is unknown
    pub fn no_such_server_bytes() -> Vec<u8> {
        vec![PacketType::A2 as u8, LAST_FLAG | NO_SUCH_SERVER_FLAG, 0]
    }

    /// Parse from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        let header = read_header("A2", data)?;
        if header[0] != PacketType::A2 as u8 {
            return Err(ProtocolError::BadHeader {
                packet: "A2",
                expected: vec![[PacketType::A2 as u8, LAST_FLAG]],
                got: header,
            });
        }
        match header[1] {
            LAST_FLAG => {}
            flags if flags == LAST_FLAG | NO_SUCH_SERVER_FLAG => {
                return Err(ProtocolError::NoSuchServer { packet: "A2" });
            }
            _ => {
                return Err(ProtocolError::BadHeader {
                    packet: "A2",
                    expected: vec![[PacketType::A2 as u8, LAST_FLAG]],
                    got: header,
                });
            }
        }

        if data.len() < Self::HEADER_SIZE {
            return Err(ProtocolError::InvalidLength {
                packet: "A2",
                expected: Self::HEADER_SIZE,
                got: data.len(),
            });
        }

        let count = data[2] as usize;
        if count == 0 || count > MAX_PROTOCOLS {
            return Err(ProtocolError::Malformed {
                packet: "A2",
                reason: format!("count must be in range [1, 127], was {}", count),
            });
        }
        expect_len("A2", data, Self::HEADER_SIZE + count * Self::ENTRY_SIZE)?;

        let entries = data[Self::HEADER_SIZE..]
            .chunks_exact(Self::ENTRY_SIZE)
            .map(|chunk| {
                let (p1, p2) = chunk.split_at(PROTOCOL_ID_LEN);
                Ok(ProtocolEntry {
                    p1: parse_protocol_field("p1", p1)?,
                    p2: parse_protocol_field("p2", p2)?,
                })
            })
            .collect::<Result<Vec<_>, ProtocolError>>()?;

        Ok(Self { entries })
    }
}

fn parse_protocol_field(field: &'static str, bytes: &[u8]) -> Result<String, ProtocolError> {
    if let Some(&byte) = bytes.iter().find(|&&b| !is_protocol_char(b)) {
        return Err(ProtocolError::InvalidProtocolChar {
            packet: "A2",
            field,
            byte,
        });
    }
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Cleartext application packet, App or MultiApp
///
/// ```text
/// App:      type(1)=5  | flags(1)=0 | time(4) | payload(n)
/// MultiApp: type(1)=11 | flags(1)=0 | time(4) | count(2) | count * (len(2) | bytes(len))
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPacket {
    pub time: u32,
    pub messages: Vec<Vec<u8>>,
}

impl AppPacket {
    /// Header plus time
    pub const HEADER_SIZE: usize = 6;

    /// Serialize, choosing App framing for one message and MultiApp otherwise
    pub fn encode<M: AsRef<[u8]>>(time: u32, messages: &[M]) -> Result<Vec<u8>, ProtocolError> {
        match messages {
            [] => Err(ProtocolError::Malformed {
                packet: "AppPacket",
                reason: "no application messages".to_string(),
            }),
            [single] => {
                let single = single.as_ref();
                check_message_len(0, single)?;

                let mut buf = Vec::with_capacity(Self::HEADER_SIZE + single.len());
                buf.extend_from_slice(&PacketType::App.header());
                buf.extend_from_slice(&time.to_le_bytes());
                buf.extend_from_slice(single);
                Ok(buf)
            }
            many => {
                if many.len() > MAX_MESSAGE_COUNT {
                    return Err(ProtocolError::Malformed {
                        packet: "MultiAppPacket",
                        reason: format!("too many application messages: {}", many.len()),
                    });
                }

                let total: usize = many.iter().map(|m| 2 + m.as_ref().len()).sum();
                let mut buf = Vec::with_capacity(Self::HEADER_SIZE + 2 + total);
                buf.extend_from_slice(&PacketType::MultiApp.header());
                buf.extend_from_slice(&time.to_le_bytes());
                buf.extend_from_slice(&(many.len() as u16).to_le_bytes());
                for (index, message) in many.iter().enumerate() {
                    let message = message.as_ref();
                    check_message_len(index, message)?;
                    buf.extend_from_slice(&(message.len() as u16).to_le_bytes());
                    buf.extend_from_slice(message);
                }
                Ok(buf)
            }
        }
    }

    /// Parse an App or MultiApp packet
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let header = read_header("AppPacket", data)?;
        if data.len() < Self::HEADER_SIZE {
            return Err(ProtocolError::InvalidLength {
                packet: "AppPacket",
                expected: Self::HEADER_SIZE,
                got: data.len(),
            });
        }
        let time = read_u32(&data[2..6]);

        if header == PacketType::App.header() {
            return Ok(Self {
                time,
                messages: vec![data[Self::HEADER_SIZE..].to_vec()],
            });
        }

        if header != PacketType::MultiApp.header() {
            return Err(ProtocolError::BadHeader {
                packet: "(Multi)AppPacket",
                expected: vec![PacketType::App.header(), PacketType::MultiApp.header()],
                got: header,
            });
        }

        Self::decode_multi(time, &data[Self::HEADER_SIZE..])
    }

    fn decode_multi(time: u32, body: &[u8]) -> Result<Self, ProtocolError> {
        let malformed = |reason: &str| ProtocolError::Malformed {
            packet: "MultiAppPacket",
            reason: reason.to_string(),
        };

        if body.len() < 2 {
            return Err(malformed("missing message count"));
        }
        let count = read_u16(body) as usize;
        if count == 0 {
            return Err(malformed("zero application messages"));
        }

        let mut rest = &body[2..];
        let mut messages = Vec::with_capacity(count);
        for _ in 0..count {
            if rest.len() < 2 {
                return Err(malformed("message missing length field"));
            }
            let len = read_u16(rest) as usize;
            if rest.len() < 2 + len {
                return Err(malformed("incomplete message"));
            }
            messages.push(rest[2..2 + len].to_vec());
            rest = &rest[2 + len..];
        }

        if !rest.is_empty() {
            return Err(malformed("trailing bytes after last message"));
        }

        Ok(Self { time, messages })
    }
}

fn check_message_len(index: usize, message: &[u8]) -> Result<(), ProtocolError> {
    if message.len() > MAX_MESSAGE_LEN {
        return Err(ProtocolError::Malformed {
            packet: "AppPacket",
            reason: format!("application message {} too large: {} bytes", index, message.len()),
        });
    }
    Ok(())
}

/// Encrypted envelope header
///
/// ```text
/// type(1)=6 | flags(1) bit 7 = last | secretbox(tag(16) | ciphertext(n))
/// ```
pub struct EncryptedHeader;

impl EncryptedHeader {
    /// Size of the envelope header
    pub const SIZE: usize = 2;

    /// Build the header bytes
    pub fn build(last: bool) -> [u8; 2] {
        [PacketType::Encrypted as u8, if last { LAST_FLAG } else { 0 }]
    }

    /// Validate the header, returning the last flag and the sealed body
    pub fn parse(data: &[u8]) -> Result<(bool, &[u8]), ProtocolError> {
        let header = read_header("EncryptedMessage", data)?;
        let last = match header {
            [6, 0] => false,
            [6, LAST_FLAG] => true,
            _ => {
                return Err(ProtocolError::BadHeader {
                    packet: "EncryptedMessage",
                    expected: vec![Self::build(false), Self::build(true)],
                    got: header,
                })
            }
        };
        Ok((last, &data[Self::SIZE..]))
    }
}
