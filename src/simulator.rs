//! In-memory network simulator for deterministic testing.
//!
//! Real links drop and corrupt datagrams at times no test can control. This
//! module provides a pair of connected [`DatagramChannel`] halves backed by
//! in-process queues, where each half applies a scripted, ordered fault plan
//! to its outgoing datagrams: the first planned action applies to the first
//! send, the second to the second, and so on; once the plan is exhausted
//! every datagram is delivered untouched.
//!
//! Bit flips are expressed as `(byte, bit)` positions, with negative byte
//! indexes addressing from the end of the frame (`-1` is the parity
//! trailer). That is enough to corrupt a parity byte, or to flip two payload
//! bits so the parity marker stays consistent while a checksum no longer
//! matches.
//!
//! A half whose peer has gone away behaves like a black hole: sends vanish,
//! receives time out.

use std::collections::VecDeque;
use std::io;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::time;
use tracing::trace;

use crate::channel::DatagramChannel;

/// What to do with one outgoing datagram.
#[derive(Debug, Clone)]
pub enum FaultAction {
    /// Pass the datagram through untouched.
    Deliver,
    /// Silently lose the datagram.
    Drop,
    /// Flip the given `(byte, bit)` positions, then deliver. Negative byte
    /// indexes address from the end of the frame.
    FlipBits(Vec<(isize, u8)>),
}

/// One half of an in-memory link.
pub struct SimChannel {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    plan: StdMutex<VecDeque<FaultAction>>,
}

/// Two connected channel halves: whatever one sends, the other receives
/// (subject to each half's fault plan).
pub fn pair() -> (SimChannel, SimChannel) {
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();
    (
        SimChannel {
            tx: left_tx,
            rx: Mutex::new(right_rx),
            plan: StdMutex::new(VecDeque::new()),
        },
        SimChannel {
            tx: right_tx,
            rx: Mutex::new(left_rx),
            plan: StdMutex::new(VecDeque::new()),
        },
    )
}

impl SimChannel {
    /// Append actions to this half's outgoing fault plan.
    pub fn plan(&self, actions: impl IntoIterator<Item = FaultAction>) {
        self.plan.lock().unwrap().extend(actions);
    }

    fn next_action(&self) -> FaultAction {
        self.plan
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(FaultAction::Deliver)
    }
}

#[async_trait]
impl DatagramChannel for SimChannel {
    async fn send_datagram(&self, frame: &[u8]) -> io::Result<()> {
        let frame = match self.next_action() {
            FaultAction::Deliver => frame.to_vec(),
            FaultAction::Drop => {
                trace!("simulator: dropping {} byte frame", frame.len());
                return Ok(());
            }
            FaultAction::FlipBits(positions) => {
                let mut mangled = frame.to_vec();
                for (byte, bit) in positions {
                    let index = if byte < 0 {
                        (mangled.len() as isize + byte) as usize
                    } else {
                        byte as usize
                    };
                    mangled[index] ^= 1 << bit;
                }
                trace!("simulator: mangling {} byte frame", frame.len());
                mangled
            }
        };

        // a closed peer is indistinguishable from a lossy wire
        let _ = self.tx.send(frame);
        Ok(())
    }

    async fn recv_datagram(&self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        match time::timeout(timeout, rx.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => {
                // sender side dropped: behave like a quiet wire
                time::sleep(timeout).await;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order_by_default() {
        let (left, right) = pair();
        left.send_datagram(b"one").await.unwrap();
        left.send_datagram(b"two").await.unwrap();

        let timeout = Duration::from_millis(50);
        assert_eq!(
            right.recv_datagram(timeout).await.unwrap().unwrap(),
            b"one"
        );
        assert_eq!(
            right.recv_datagram(timeout).await.unwrap().unwrap(),
            b"two"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn planned_drop_loses_exactly_one_datagram() {
        let (left, right) = pair();
        left.plan([FaultAction::Drop]);

        left.send_datagram(b"lost").await.unwrap();
        left.send_datagram(b"kept").await.unwrap();

        let timeout = Duration::from_millis(50);
        assert_eq!(
            right.recv_datagram(timeout).await.unwrap().unwrap(),
            b"kept"
        );
        assert!(right.recv_datagram(timeout).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn flip_bits_addresses_from_both_ends() {
        let (left, right) = pair();
        left.plan([FaultAction::FlipBits(vec![(0, 0), (-1, 7)])]);

        left.send_datagram(&[0x00, 0xFF, 0x00]).await.unwrap();
        let received = right
            .recv_datagram(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, vec![0x01, 0xFF, 0x80]);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_link_times_out() {
        let (left, _right) = pair();
        assert!(left
            .recv_datagram(Duration::from_millis(50))
            .await
            .unwrap()
            .is_none());
    }
}
