use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::net::UdpSocket;
use tokio::time;
use tracing::trace;

/// Abstraction over the unreliable point-to-point datagram transport,
/// introduced to facilitate mocking the I/O part away for testing.
///
/// The channel may lose, duplicate or corrupt datagrams; it is not expected
/// to reorder them. The peer address is fixed when the channel is created,
/// so the session never deals in addresses.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramChannel: Send + Sync + 'static {
    /// Send one frame to the peer. An error here is a transport failure,
    /// not a lost packet - losses are silent.
    async fn send_datagram(&self, frame: &[u8]) -> io::Result<()>;

    /// Wait up to `timeout` for the next frame. `Ok(None)` means the window
    /// elapsed without one.
    async fn recv_datagram(&self, timeout: Duration) -> io::Result<Option<Vec<u8>>>;
}

/// [`DatagramChannel`] over a connected UDP socket.
pub struct UdpChannel {
    socket: UdpSocket,
    recv_buf_size: usize,
}

impl UdpChannel {
    /// Bind `bind_addr` and fix `peer` as the only communication partner.
    /// `recv_buf_size` caps the largest deliverable datagram; oversized
    /// datagrams arrive truncated and are then rejected by the codec's
    /// length check.
    pub async fn connect(
        bind_addr: SocketAddr,
        peer: SocketAddr,
        recv_buf_size: usize,
    ) -> io::Result<UdpChannel> {
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(peer).await?;
        Ok(UdpChannel {
            socket,
            recv_buf_size,
        })
    }

    /// Wrap a socket that is already bound and connected.
    pub fn from_socket(socket: UdpSocket, recv_buf_size: usize) -> UdpChannel {
        UdpChannel {
            socket,
            recv_buf_size,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl DatagramChannel for UdpChannel {
    async fn send_datagram(&self, frame: &[u8]) -> io::Result<()> {
        trace!("UDP socket: sending {} byte frame", frame.len());
        self.socket.send(frame).await?;
        Ok(())
    }

    async fn recv_datagram(&self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.recv_buf_size];
        match time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok(num_read)) => {
                buf.truncate(num_read);
                Ok(Some(buf))
            }
            Ok(Err(e)) => Err(e),
        }
    }
}
