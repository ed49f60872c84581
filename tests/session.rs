//! End-to-end sessions: a real client and a real server, talking through
//! the in-memory simulator (with scripted loss and corruption) or through
//! actual UDP sockets on loopback.
//!
//! The simulator tests run on tokio's paused clock, so every retransmission
//! timeout elapses instantly and deterministically.

use std::sync::Arc;

use lockstep::simulator::{self, FaultAction, SimChannel};
use lockstep::{
    ClientSession, CloseOutcome, Phase, ProtocolConfig, ServerEvent, ServerSession, ThreadRngIsn,
    TransportError, UdpChannel,
};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

fn config() -> Arc<ProtocolConfig> {
    Arc::new(ProtocolConfig::default_lan())
}

/// Accept one connection and collect every event until the stream ends one
/// way or the other.
fn spawn_server(channel: SimChannel) -> JoinHandle<(Vec<ServerEvent>, Phase)> {
    tokio::spawn(async move {
        let mut session = ServerSession::accept(Arc::new(channel), Arc::new(ThreadRngIsn), config())
            .await
            .expect("server handshake failed");

        let mut events = Vec::new();
        loop {
            let event = session.recv().await.expect("server recv failed");
            let last = matches!(
                event,
                ServerEvent::EndOfStream | ServerEvent::ChecksumMismatch { resumed: false }
            );
            events.push(event);
            if last {
                break;
            }
        }
        (events, session.phase())
    })
}

async fn connect_client(channel: SimChannel) -> ClientSession {
    ClientSession::connect(Arc::new(channel), Arc::new(ThreadRngIsn), config())
        .await
        .expect("client handshake failed")
}

#[tokio::test(start_paused = true)]
async fn happy_path_single_chunk() {
    let (client_channel, server_channel) = simulator::pair();
    let server = spawn_server(server_channel);

    let mut client = connect_client(client_channel).await;
    client.send(b"HI").await.unwrap();
    assert_eq!(client.close().await.unwrap(), CloseOutcome::Closed);
    assert_eq!(client.phase(), Phase::ClosedOk);

    let (events, phase) = server.await.unwrap();
    assert_eq!(
        events,
        vec![ServerEvent::Chunk(b"HI".to_vec()), ServerEvent::EndOfStream]
    );
    assert_eq!(phase, Phase::ClosedOk);
}

#[tokio::test(start_paused = true)]
async fn chunks_arrive_in_submission_order() {
    let (client_channel, server_channel) = simulator::pair();
    let server = spawn_server(server_channel);

    let chunks: Vec<&[u8]> = vec![b"first", b"second", b"third", b"", b"fifth"];

    let mut client = connect_client(client_channel).await;
    for chunk in &chunks {
        client.send(chunk).await.unwrap();
    }
    assert_eq!(client.close().await.unwrap(), CloseOutcome::Closed);

    let (events, _) = server.await.unwrap();
    let mut expected: Vec<ServerEvent> = chunks
        .iter()
        .map(|c| ServerEvent::Chunk(c.to_vec()))
        .collect();
    expected.push(ServerEvent::EndOfStream);
    assert_eq!(events, expected);
}

#[tokio::test(start_paused = true)]
async fn corrupted_data_parity_is_nakked_and_resent() {
    let (client_channel, server_channel) = simulator::pair();
    // client's outgoing frames: SYN, handshake ACK, DATA - flip one bit of
    // the DATA frame's parity trailer
    client_channel.plan([
        FaultAction::Deliver,
        FaultAction::Deliver,
        FaultAction::FlipBits(vec![(-1, 0)]),
    ]);
    let server = spawn_server(server_channel);

    let mut client = connect_client(client_channel).await;
    client.send(b"HI").await.unwrap();
    assert_eq!(client.close().await.unwrap(), CloseOutcome::Closed);

    // the chunk arrives exactly once despite the corrupt first copy
    let (events, _) = server.await.unwrap();
    assert_eq!(
        events,
        vec![ServerEvent::Chunk(b"HI".to_vec()), ServerEvent::EndOfStream]
    );
}

#[tokio::test(start_paused = true)]
async fn lost_syn_ack_is_recovered_by_both_sides_retrying() {
    let (client_channel, server_channel) = simulator::pair();
    // the server's first outgoing frame is the SYN-ACK
    server_channel.plan([FaultAction::Drop]);
    let server = spawn_server(server_channel);

    let mut client = connect_client(client_channel).await;
    client.send(b"HI").await.unwrap();
    assert_eq!(client.close().await.unwrap(), CloseOutcome::Closed);

    let (events, _) = server.await.unwrap();
    assert_eq!(
        events,
        vec![ServerEvent::Chunk(b"HI".to_vec()), ServerEvent::EndOfStream]
    );
}

#[tokio::test(start_paused = true)]
async fn lost_handshake_ack_is_recovered_via_syn_ack_repetition() {
    let (client_channel, server_channel) = simulator::pair();
    // client's outgoing frames: SYN (delivered), handshake ACK (lost). The
    // server keeps repeating its SYN-ACK; the client answers it again
    // because no data has been acknowledged yet, then retransmits the chunk
    client_channel.plan([FaultAction::Deliver, FaultAction::Drop]);
    let server = spawn_server(server_channel);

    let mut client = connect_client(client_channel).await;
    client.send(b"HI").await.unwrap();
    assert_eq!(client.close().await.unwrap(), CloseOutcome::Closed);

    // exactly one delivery: the DATA the server ignored pre-handshake is
    // only folded in via its retransmission
    let (events, _) = server.await.unwrap();
    assert_eq!(
        events,
        vec![ServerEvent::Chunk(b"HI".to_vec()), ServerEvent::EndOfStream]
    );
}

#[tokio::test(start_paused = true)]
async fn checksum_mismatch_resets_and_the_replay_completes() {
    let (client_channel, server_channel) = simulator::pair();
    // client's outgoing frames: SYN, handshake ACK, DATA, FIN - flip two
    // bits of the FIN's checksum payload (byte 9 is its first byte), which
    // keeps the parity marker consistent but breaks the CRC comparison
    client_channel.plan([
        FaultAction::Deliver,
        FaultAction::Deliver,
        FaultAction::Deliver,
        FaultAction::FlipBits(vec![(9, 0), (9, 1)]),
    ]);
    let server = spawn_server(server_channel);

    let mut client = connect_client(client_channel).await;
    client.send(b"HI").await.unwrap();

    // the server rejects the stream and the session re-establishes itself
    let outcome = client.close().await.unwrap();
    assert_eq!(outcome, CloseOutcome::RestartRequired { bytes_sent: 2 });
    assert_eq!(client.phase(), Phase::Established);

    // the application decides to replay
    client.send(b"HI").await.unwrap();
    assert_eq!(client.close().await.unwrap(), CloseOutcome::Closed);

    let (events, phase) = server.await.unwrap();
    assert_eq!(
        events,
        vec![
            ServerEvent::Chunk(b"HI".to_vec()),
            ServerEvent::ChecksumMismatch { resumed: true },
            ServerEvent::Chunk(b"HI".to_vec()),
            ServerEvent::EndOfStream,
        ]
    );
    assert_eq!(phase, Phase::ClosedOk);
}

#[tokio::test(start_paused = true)]
async fn lost_data_ack_duplicates_and_the_restart_recovers() {
    let (client_channel, server_channel) = simulator::pair();
    // server's outgoing frames: SYN-ACK (delivered), data ACK (lost). The
    // client retransmits a chunk the server has already delivered; without
    // sequence correlation in the data phase the duplicate is folded in
    // again, so the checksums disagree at termination and the reset path
    // straightens everything out
    server_channel.plan([FaultAction::Deliver, FaultAction::Drop]);
    let server = spawn_server(server_channel);

    let mut client = connect_client(client_channel).await;
    client.send(b"HI").await.unwrap();

    let outcome = client.close().await.unwrap();
    assert_eq!(outcome, CloseOutcome::RestartRequired { bytes_sent: 2 });

    client.send(b"HI").await.unwrap();
    assert_eq!(client.close().await.unwrap(), CloseOutcome::Closed);

    let (events, _) = server.await.unwrap();
    assert_eq!(
        events,
        vec![
            ServerEvent::Chunk(b"HI".to_vec()),
            ServerEvent::Chunk(b"HI".to_vec()), // the duplicate
            ServerEvent::ChecksumMismatch { resumed: true },
            ServerEvent::Chunk(b"HI".to_vec()),
            ServerEvent::EndOfStream,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn handshake_fails_cleanly_when_every_syn_is_lost() {
    let (client_channel, server_channel) = simulator::pair();
    client_channel.plan([FaultAction::Drop, FaultAction::Drop, FaultAction::Drop]);
    // nobody is listening, but the link stays up
    let _server_channel = server_channel;

    let result =
        ClientSession::connect(Arc::new(client_channel), Arc::new(ThreadRngIsn), config()).await;

    assert!(matches!(
        result,
        Err(TransportError::RetriesExhausted {
            phase: Phase::SynSent,
            attempts: 3
        })
    ));
}

#[tokio::test]
async fn udp_loopback_transfer() {
    let client_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client_socket
        .connect(server_socket.local_addr().unwrap())
        .await
        .unwrap();
    server_socket
        .connect(client_socket.local_addr().unwrap())
        .await
        .unwrap();

    let max = config().max_datagram_size;
    let client_channel = UdpChannel::from_socket(client_socket, max);
    let server_channel = UdpChannel::from_socket(server_socket, max);

    let server = tokio::spawn(async move {
        let mut session =
            ServerSession::accept(Arc::new(server_channel), Arc::new(ThreadRngIsn), config())
                .await
                .unwrap();
        let mut delivered = Vec::new();
        loop {
            match session.recv().await.unwrap() {
                ServerEvent::Chunk(chunk) => delivered.extend_from_slice(&chunk),
                ServerEvent::EndOfStream => return delivered,
                other => panic!("unexpected event on a clean link: {other:?}"),
            }
        }
    });

    let mut client = ClientSession::connect(Arc::new(client_channel), Arc::new(ThreadRngIsn), config())
        .await
        .unwrap();
    client.send(b"over the ").await.unwrap();
    client.send(b"real loopback").await.unwrap();
    assert_eq!(client.close().await.unwrap(), CloseOutcome::Closed);

    assert_eq!(server.await.unwrap(), b"over the real loopback");
}
