//! Minimal end-to-end demo: a server and a client exchanging a short
//! stream over UDP on loopback, with protocol-level logging enabled.
//!
//! Run with `cargo run --example loopback`.

use std::sync::Arc;

use lockstep::{
    ClientSession, CloseOutcome, ProtocolConfig, ServerEvent, ServerSession, ThreadRngIsn,
    UdpChannel,
};
use tokio::net::UdpSocket;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    let config = Arc::new(ProtocolConfig::default_lan());

    let client_socket = UdpSocket::bind("127.0.0.1:0").await?;
    let server_socket = UdpSocket::bind("127.0.0.1:0").await?;
    client_socket.connect(server_socket.local_addr()?).await?;
    server_socket.connect(client_socket.local_addr()?).await?;

    let server_channel = UdpChannel::from_socket(server_socket, config.max_datagram_size);
    let client_channel = UdpChannel::from_socket(client_socket, config.max_datagram_size);

    let server_config = config.clone();
    let server = tokio::spawn(async move {
        let mut session = ServerSession::accept(
            Arc::new(server_channel),
            Arc::new(ThreadRngIsn),
            server_config,
        )
        .await?;

        loop {
            match session.recv().await? {
                ServerEvent::Chunk(chunk) => {
                    info!("server: received {:?}", String::from_utf8_lossy(&chunk));
                }
                ServerEvent::EndOfStream => {
                    info!("server: stream complete");
                    return anyhow::Ok(());
                }
                ServerEvent::ChecksumMismatch { resumed } => {
                    info!("server: checksum mismatch, resumed={}", resumed);
                    if !resumed {
                        return anyhow::Ok(());
                    }
                }
            }
        }
    });

    let mut client =
        ClientSession::connect(Arc::new(client_channel), Arc::new(ThreadRngIsn), config).await?;
    for line in ["hello", "from", "the lock-step transport"] {
        client.send(line.as_bytes()).await?;
    }
    match client.close().await? {
        CloseOutcome::Closed => info!("client: stream acknowledged end to end"),
        CloseOutcome::RestartRequired { bytes_sent } => {
            info!("client: peer reset after {} bytes; giving up", bytes_sent);
        }
    }

    server.await??;
    Ok(())
}
