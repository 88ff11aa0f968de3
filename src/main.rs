//! saltchannel CLI - Salt Channel v2 client/server
//!
//! Generates identities, runs a TCP echo service, connects to a server
//! and runs A1/A2 discovery, all driven by a `.conf` file.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use clap::{Parser, Subcommand};
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::{fmt, EnvFilter};

use saltchannel::config::{PeerConfig, ServerConfig};
use saltchannel::error::ConfigError;
use saltchannel::protocol::discovery::SALT_CHANNEL_PROTOCOL;
use saltchannel::{
    DiscoveryOutcome, ExchangeKeyPair, SaltChannelError, SaltClient, SaltConfig, SaltServer,
    SessionConfig, SessionState, SigKeyPair, TcpTransport,
};

/// How long the echo service waits for the next message
const ECHO_IDLE_WAIT: Duration = Duration::from_secs(60);

/// How long `connect` waits for each echo
const REPLY_WAIT: Duration = Duration::from_secs(5);

/// saltchannel - Salt Channel v2 client/server
#[derive(Parser, Debug)]
#[command(name = "saltchannel")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a fresh signature key pair
    Keygen,

    /// Run a Salt Channel echo server
    Serve {
        /// Path to configuration file with [Identity] and [Server]
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Handshake with a server and send messages
    Connect {
        /// Path to configuration file with [Identity] and [Peer]
        #[arg(short, long)]
        config: PathBuf,

        /// Flag the final message as the last of the session
        #[arg(long)]
        close: bool,

        /// Messages to send, one frame each
        #[arg(required = true)]
        messages: Vec<String>,
    },

    /// Ask a server which protocols it supports
    Discover {
        /// Path to configuration file with [Identity] and [Peer]
        #[arg(short, long)]
        config: PathBuf,

        /// Address the request to this base64 server signature key
        #[arg(long)]
        address: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    match run(args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(args: Args) -> Result<(), SaltChannelError> {
    match args.command {
        Command::Keygen => {
            let keys = SigKeyPair::generate();
            println!("SigningKey = {}", BASE64.encode(&keys.secret_bytes()[..]));
            println!("PublicKey = {}", BASE64.encode(keys.public_key()));
            Ok(())
        }
        Command::Serve { config } => {
            let config = load_config(&config)?;
            let server = config.server.clone().ok_or(ConfigError::MissingField {
                field: "[Server] section".to_string(),
            })?;
            serve(config.identity, server, config.session).await
        }
        Command::Connect {
            config,
            close,
            messages,
        } => {
            let config = load_config(&config)?;
            let peer = peer_section(&config)?;
            connect(config.identity, peer, config.session, close, messages).await
        }
        Command::Discover { config, address } => {
            let config = load_config(&config)?;
            let peer = peer_section(&config)?;
            let address = address.map(|a| decode_address(&a)).transpose()?;
            discover(config.identity, peer, config.session, address).await
        }
    }
}

fn load_config(path: &Path) -> Result<SaltConfig, SaltChannelError> {
    tracing::info!("Loading configuration from: {}", path.display());
    let config = SaltConfig::from_file(path)?;
    tracing::info!("Identity: {}", BASE64.encode(config.public_key()));
    Ok(config)
}

fn peer_section(config: &SaltConfig) -> Result<PeerConfig, SaltChannelError> {
    config.peer.clone().ok_or_else(|| {
        ConfigError::MissingField {
            field: "[Peer] section".to_string(),
        }
        .into()
    })
}

fn decode_address(value: &str) -> Result<[u8; 32], SaltChannelError> {
    let bytes = BASE64.decode(value).map_err(|_| SaltChannelError::InvalidArgument {
        reason: format!("address is not base64: {}", value),
    })?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| SaltChannelError::InvalidArgument {
            reason: format!("address must be 32 bytes, got {}", bytes.len()),
        })
}

/// Accept connections until Ctrl+C, one task per connection
async fn serve(
    identity: SigKeyPair,
    server: ServerConfig,
    session: SessionConfig,
) -> Result<(), SaltChannelError> {
    let listener = TcpListener::bind(server.listen_address)
        .await
        .map_err(saltchannel::error::TransportError::Io)?;
    tracing::info!(
        "Salt Channel echo server listening on {} ({})",
        server.listen_address,
        server.protocols.join(", ")
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Accept failed: {}", e);
                        continue;
                    }
                };
                tracing::info!("Connection from {}", addr);

                let identity = identity.clone();
                let protocols = server.protocols.clone();
                let session = session.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, identity, protocols, session).await {
                        tracing::info!("Connection from {} ended: {}", addr, e);
                    }
                });
            }
            _ = &mut ctrl_c => {
                tracing::info!("Received Ctrl+C, shutting down...");
                return Ok(());
            }
        }
    }
}

/// Serve one connection: discovery, handshake, then echo
async fn handle_connection(
    stream: TcpStream,
    identity: SigKeyPair,
    protocols: Vec<String>,
    session: SessionConfig,
) -> Result<(), SaltChannelError> {
    let transport = TcpTransport::new(stream)?;
    let wait = session.discovery_timeout;
    let mut server = SaltServer::with_config(transport, identity, session);

    loop {
        match server.respond_discovery(&protocols, wait).await? {
            DiscoveryOutcome::Idle | DiscoveryOutcome::Answered => continue,
            DiscoveryOutcome::Selected { protocol } if protocol == SALT_CHANNEL_PROTOCOL => break,
            DiscoveryOutcome::Selected { protocol } => {
                tracing::warn!("Protocol {} has no handler here", protocol);
                return Ok(());
            }
        }
    }

    let mut channel = server.handshake(ExchangeKeyPair::generate()).await?;
    tracing::info!("Client {}", BASE64.encode(channel.peer_sig_key()));

    while channel.state() == SessionState::Ready || channel.state() == SessionState::Last {
        let received = channel.receive(ECHO_IDLE_WAIT).await?;
        let Some(message) = received.message else {
            continue;
        };
        if received.closed {
            tracing::info!("Client closed the session");
            break;
        }
        if channel.state() == SessionState::Ready {
            channel.send(false, &[message]).await?;
        }
    }

    channel.close().await;
    Ok(())
}

async fn connect(
    identity: SigKeyPair,
    peer: PeerConfig,
    session: SessionConfig,
    close: bool,
    messages: Vec<String>,
) -> Result<(), SaltChannelError> {
    let transport = TcpTransport::connect(peer.endpoint).await?;
    let client = SaltClient::with_config(transport, identity, session);

    let mut channel = client
        .handshake(ExchangeKeyPair::generate(), peer.server_key)
        .await?;
    println!("Connected to {}", BASE64.encode(channel.peer_sig_key()));

    let count = messages.len();
    for (index, message) in messages.iter().enumerate() {
        let last = close && index + 1 == count;
        channel.send(last, &[message.as_bytes()]).await?;
        if last {
            break;
        }

        let reply = channel.receive(REPLY_WAIT).await?;
        match reply.message {
            Some(bytes) => println!("{}", String::from_utf8_lossy(&bytes)),
            None => println!("(no reply within {:?})", REPLY_WAIT),
        }
    }

    channel.close().await;
    Ok(())
}

async fn discover(
    identity: SigKeyPair,
    peer: PeerConfig,
    session: SessionConfig,
    address: Option<[u8; 32]>,
) -> Result<(), SaltChannelError> {
    let transport = TcpTransport::connect(peer.endpoint).await?;
    let mut client = SaltClient::with_config(transport, identity, session);

    let entries = client.discover(address).await?;
    for entry in entries {
        println!("{} {}", entry.p1, entry.p2);
    }
    Ok(())
}
