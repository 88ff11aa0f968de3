//! Salt Channel configuration file parser
//!
//! Parses `.conf` files with [Identity], [Server], [Peer] and [Session]
//! sections. Keys are base64, timeouts are milliseconds.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::config::SessionConfig;
use crate::crypto::{sign, SigKeyPair};
use crate::error::ConfigError;
use crate::protocol::messages::{is_protocol_char, PROTOCOL_ID_LEN};

/// Complete CLI configuration
#[derive(Debug, Clone)]
pub struct SaltConfig {
    /// Our long-term signature key pair
    pub identity: SigKeyPair,
    /// Listening side (optional)
    pub server: Option<ServerConfig>,
    /// Connecting side (optional)
    pub peer: Option<PeerConfig>,
    /// Engine settings
    pub session: SessionConfig,
}

/// [Server] section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen_address: SocketAddr,
    /// Protocols advertised in A2 and used for sniffing, in order
    pub protocols: Vec<String>,
}

/// [Peer] section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub endpoint: SocketAddr,
    /// Expected server signature key (optional)
    pub server_key: Option<[u8; 32]>,
}

impl SaltConfig {
    /// Parse a configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ConfigError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// Parse a configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut identity: Option<SigKeyPair> = None;
        let mut listen_address: Option<SocketAddr> = None;
        let mut protocols: Vec<String> = Vec::new();
        let mut server_seen = false;
        let mut endpoint: Option<SocketAddr> = None;
        let mut server_key: Option<[u8; 32]> = None;
        let mut peer_seen = false;
        let mut session = SessionConfig::default();
        let mut current_section: Option<Section> = None;

        for (line_num, line) in content.lines().enumerate() {
            let line_num = line_num + 1;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') {
                current_section = Some(Section::from_header(line).ok_or_else(|| {
                    ConfigError::ParseError {
                        line: line_num,
                        message: format!("Unknown section: {}", line),
                    }
                })?);
                match current_section {
                    Some(Section::Server) => server_seen = true,
                    Some(Section::Peer) => peer_seen = true,
                    _ => {}
                }
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::ParseError {
                    line: line_num,
                    message: format!("Expected 'key = value', got: {}", line),
                });
            };

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match current_section {
                Some(Section::Identity) => match key.as_str() {
                    "signingkey" => {
                        let bytes = decode_base64(value, "SigningKey")?;
                        identity = Some(SigKeyPair::from_secret_bytes(&bytes).map_err(|_| {
                            ConfigError::InvalidKey {
                                field: "SigningKey".to_string(),
                            }
                        })?);
                    }
                    _ => tracing::debug!("Unknown identity key: {}", key),
                },
                Some(Section::Server) => match key.as_str() {
                    "listenaddress" => listen_address = Some(parse_endpoint(value)?),
                    "protocols" => {
                        for protocol in value.split(',') {
                            let protocol = protocol.trim();
                            if protocol.is_empty() {
                                continue;
                            }
                            validate_protocol(protocol, line_num)?;
                            protocols.push(protocol.to_string());
                        }
                    }
                    _ => tracing::debug!("Unknown server key: {}", key),
                },
                Some(Section::Peer) => match key.as_str() {
                    "endpoint" => endpoint = Some(parse_endpoint(value)?),
                    "serverkey" => server_key = Some(parse_key(value, "ServerKey")?),
                    _ => tracing::debug!("Unknown peer key: {}", key),
                },
                Some(Section::Session) => match key.as_str() {
                    "handshaketimeout" => {
                        session.handshake_timeout = parse_millis(value, "HandshakeTimeout", line_num)?
                    }
                    "discoverytimeout" => {
                        session.discovery_timeout = parse_millis(value, "DiscoveryTimeout", line_num)?
                    }
                    "delaythreshold" => {
                        session.delay_threshold = parse_millis(value, "DelayThreshold", line_num)?
                    }
                    "timetracking" => session.time_tracking = parse_bool(value, line_num)?,
                    _ => tracing::debug!("Unknown session key: {}", key),
                },
                None => {
                    return Err(ConfigError::ParseError {
                        line: line_num,
                        message: "Configuration value outside of any section".to_string(),
                    });
                }
            }
        }

        let identity = identity.ok_or(ConfigError::MissingField {
            field: "SigningKey in [Identity]".to_string(),
        })?;

        let server = if server_seen {
            let listen_address = listen_address.ok_or(ConfigError::MissingField {
                field: "ListenAddress in [Server]".to_string(),
            })?;
            if protocols.is_empty() {
                protocols.push(crate::protocol::discovery::SALT_CHANNEL_PROTOCOL.to_string());
            }
            Some(ServerConfig {
                listen_address,
                protocols,
            })
        } else {
            None
        };

        let peer = if peer_seen {
            let endpoint = endpoint.ok_or(ConfigError::MissingField {
                field: "Endpoint in [Peer]".to_string(),
            })?;
            Some(PeerConfig {
                endpoint,
                server_key,
            })
        } else {
            None
        };

        Ok(SaltConfig {
            identity,
            server,
            peer,
            session,
        })
    }

    /// Our public signature key
    pub fn public_key(&self) -> [u8; 32] {
        self.identity.public_key()
    }
}

/// Section type during parsing
#[derive(Clone, Copy)]
enum Section {
    Identity,
    Server,
    Peer,
    Session,
}

impl Section {
    fn from_header(line: &str) -> Option<Self> {
        match line.to_lowercase().as_str() {
            "[identity]" => Some(Self::Identity),
            "[server]" => Some(Self::Server),
            "[peer]" => Some(Self::Peer),
            "[session]" => Some(Self::Session),
            _ => None,
        }
    }
}

fn decode_base64(value: &str, field_name: &str) -> Result<Vec<u8>, ConfigError> {
    BASE64.decode(value).map_err(|_| ConfigError::InvalidKey {
        field: field_name.to_string(),
    })
}

/// Parse a base64-encoded 32-byte public key
fn parse_key(value: &str, field_name: &str) -> Result<[u8; sign::PUBLIC_KEY_LEN], ConfigError> {
    let bytes = decode_base64(value, field_name)?;

    bytes.as_slice().try_into().map_err(|_| ConfigError::InvalidKey {
        field: field_name.to_string(),
    })
}

/// Parse an endpoint (ip:port)
fn parse_endpoint(value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse::<SocketAddr>().map_err(|_| ConfigError::InvalidAddress {
        value: value.to_string(),
    })
}

fn parse_millis(value: &str, field_name: &str, line: usize) -> Result<Duration, ConfigError> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::ParseError {
            line,
            message: format!("Invalid {}: {}", field_name, value),
        })
}

fn parse_bool(value: &str, line: usize) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::ParseError {
            line,
            message: format!("Invalid TimeTracking: {}", value),
        }),
    }
}

/// Protocol names must fit an A2 entry
fn validate_protocol(protocol: &str, line: usize) -> Result<(), ConfigError> {
    if protocol.len() > PROTOCOL_ID_LEN || !protocol.bytes().all(is_protocol_char) {
        return Err(ConfigError::ParseError {
            line,
            message: format!(
                "Invalid protocol '{}': at most {} characters from [A-Za-z0-9_-]",
                protocol, PROTOCOL_ID_LEN
            ),
        });
    }
    Ok(())
}
