//! Bus transport seam.
//!
//! The chain runs over whatever physical bus the hardware provides; the
//! firmware core only needs blocking send/receive on 8-byte frames. The
//! in-memory hub used by simulations lives in [`crate::sim`].

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::bus::{Frame, Message};
use crate::constants::TX_PERMITS;
use crate::Result;

/// Blocking frame transport attached to the shared bus.
///
/// `recv` has no timeout path; shutdown unblocks a receiver by closing the
/// port, which surfaces as an error on both directions from then on.
pub trait BusPort: Send + Sync {
    /// Transmits one frame, blocking until the bus accepts it.
    fn send(&self, frame: Frame) -> Result<()>;

    /// Receives the next frame addressed to this unit, blocking until one
    /// arrives or the port closes.
    fn recv(&self) -> Result<Frame>;

    /// Closes the port; pending and future operations fail.
    fn close(&self);
}

/// Counting permits modelling the bus controller's transmit mailboxes.
struct TxPermits {
    count: Mutex<usize>,
    freed: Condvar,
}

impl TxPermits {
    fn new(count: usize) -> Self {
        TxPermits {
            count: Mutex::new(count),
            freed: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.freed.wait(&mut count);
        }
        *count -= 1;
    }

    fn release(&self) {
        *self.count.lock() += 1;
        self.freed.notify_one();
    }
}

/// Sending half of a unit's bus attachment.
///
/// All outbound traffic of one unit, queued or direct, goes through one
/// shared permit pool sized to the controller's mailbox count, so at most
/// [`TX_PERMITS`] sends are in flight at a time.
pub struct BusSender {
    port: Arc<dyn BusPort>,
    permits: Arc<TxPermits>,
}

impl BusSender {
    /// Sender over the given port with a fresh permit pool.
    pub fn new(port: Arc<dyn BusPort>) -> Self {
        BusSender {
            port,
            permits: Arc::new(TxPermits::new(TX_PERMITS)),
        }
    }

    /// Encodes and transmits one message, blocking for a permit first.
    pub fn send(&self, message: &Message) -> Result<()> {
        self.permits.acquire();
        let result = self.port.send(message.encode());
        self.permits.release();
        result
    }
}

impl Clone for BusSender {
    fn clone(&self) -> Self {
        BusSender {
            port: Arc::clone(&self.port),
            permits: Arc::clone(&self.permits),
        }
    }
}

impl std::fmt::Debug for BusSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSender").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SynthError;
    use std::sync::mpsc;
    use std::time::Duration;

    struct LoopbackPort {
        tx: Mutex<mpsc::Sender<Frame>>,
    }

    impl BusPort for LoopbackPort {
        fn send(&self, frame: Frame) -> Result<()> {
            self.tx
                .lock()
                .send(frame)
                .map_err(|_| SynthError::BusError("loopback closed".into()))
        }

        fn recv(&self) -> Result<Frame> {
            Err(SynthError::BusError("loopback is send-only".into()))
        }

        fn close(&self) {}
    }

    #[test]
    fn test_sender_encodes_onto_the_port() {
        let (tx, rx) = mpsc::channel();
        let sender = BusSender::new(Arc::new(LoopbackPort { tx: Mutex::new(tx) }));
        sender.send(&Message::ReceiverClaim { octave: 4 }).unwrap();
        let frame = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(Message::decode(&frame), Some(Message::ReceiverClaim { octave: 4 }));
    }

    #[test]
    fn test_clones_share_one_permit_pool() {
        let (tx, rx) = mpsc::channel();
        let sender = BusSender::new(Arc::new(LoopbackPort { tx: Mutex::new(tx) }));
        let direct = sender.clone();
        for _ in 0..TX_PERMITS * 2 {
            sender.send(&Message::NewHandshake { position: 0 }).unwrap();
            direct.send(&Message::NewHandshake { position: 1 }).unwrap();
        }
        // Every send released its permit, none leaked.
        assert_eq!(rx.try_iter().count(), TX_PERMITS * 4);
        sender.send(&Message::FinalHandshake { length: 0 }).unwrap();
    }

    #[test]
    fn test_permits_bound_concurrent_senders() {
        let permits = Arc::new(TxPermits::new(2));
        permits.acquire();
        permits.acquire();

        let (done_tx, done_rx) = mpsc::channel();
        let blocked = Arc::clone(&permits);
        std::thread::spawn(move || {
            blocked.acquire();
            done_tx.send(()).unwrap();
        });

        // Pool exhausted: the third acquire must wait for a release.
        assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());
        permits.release();
        assert!(done_rx.recv_timeout(Duration::from_secs(1)).is_ok());
    }
}
