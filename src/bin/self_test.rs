//! Self-test: run a full session between two in-process peers
//! Client and server share a memory transport, so every step of the
//! handshake and the application framing can be checked end to end.

use std::process::ExitCode;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use saltchannel::{
    ExchangeKeyPair, MemoryTransport, SaltChannelError, SaltClient, SaltServer, SessionState,
    SigKeyPair,
};

const WAIT: Duration = Duration::from_secs(2);

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    println!("=== Self-Test: Salt Channel v2 Session ===\n");

    match run().await {
        Ok(true) => {
            println!("\n*** SELF-TEST PASSED! ***");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            println!("\n*** SELF-TEST FAILED ***");
            ExitCode::FAILURE
        }
        Err(e) => {
            println!("\n*** SELF-TEST ERROR: {} ***", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run() -> Result<bool, SaltChannelError> {
    let client_keys = SigKeyPair::generate();
    let server_keys = SigKeyPair::generate();
    println!("Client identity: {}", BASE64.encode(client_keys.public_key()));
    println!("Server identity: {}", BASE64.encode(server_keys.public_key()));

    let (client_end, server_end) = MemoryTransport::pair();
    let mut client = SaltClient::new(client_end, client_keys.clone());
    let mut server = SaltServer::new(server_end, server_keys.clone());

    println!("\n--- Discovery ---");
    let protocols = ["SCv2", "ECHO"];
    let (entries, outcome) = tokio::join!(
        client.discover(None),
        server.respond_discovery(&protocols, WAIT)
    );
    let entries = entries?;
    outcome?;
    for entry in &entries {
        println!("  {} {}", entry.p1, entry.p2);
    }
    let mut ok = check("server offers two protocols", entries.len() == 2);

    println!("\n--- Handshake ---");
    let pinned = Some(server_keys.public_key());
    let (client_side, server_side) = tokio::join!(
        client.handshake(ExchangeKeyPair::generate(), pinned),
        server.handshake(ExchangeKeyPair::generate())
    );
    let mut client_channel = client_side?;
    let mut server_channel = server_side?;

    ok &= check("client is ready", client_channel.state() == SessionState::Ready);
    ok &= check("server is ready", server_channel.state() == SessionState::Ready);
    ok &= check(
        "transcripts match",
        client_channel.transcript() == server_channel.transcript(),
    );
    ok &= check(
        "client sees server identity",
        *client_channel.peer_sig_key() == server_keys.public_key(),
    );
    ok &= check(
        "server sees client identity",
        *server_channel.peer_sig_key() == client_keys.public_key(),
    );

    println!("\n--- Application data ---");
    client_channel.send(false, &[b"ping"]).await?;
    let received = server_channel.receive(WAIT).await?;
    ok &= check(
        "server decrypts App packet",
        received.message.as_deref() == Some(&b"ping"[..]),
    );

    server_channel.send(false, &[&b"one"[..], &b"two"[..]]).await?;
    let first = client_channel.receive(WAIT).await?;
    let second = client_channel.receive(WAIT).await?;
    ok &= check(
        "client decrypts MultiApp packet in order",
        first.message.as_deref() == Some(&b"one"[..])
            && second.message.as_deref() == Some(&b"two"[..]),
    );

    println!("\n--- Last message ---");
    client_channel.send(true, &[b"bye"]).await?;
    let last = server_channel.receive(WAIT).await?;
    ok &= check(
        "server sees last flag",
        last.closed && last.message.as_deref() == Some(&b"bye"[..]),
    );
    ok &= check("client closed", client_channel.state() == SessionState::Closed);
    ok &= check("server closed", server_channel.state() == SessionState::Closed);

    Ok(ok)
}

fn check(label: &str, passed: bool) -> bool {
    println!("  {:<42} {}", label, if passed { "ok" } else { "MISMATCH" });
    passed
}
