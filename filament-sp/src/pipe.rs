//! Transport-independent pipes.
//!
//! A pipe is the bidirectional message channel an endpoint hands to its
//! socket once a connection is up. Each side holds a [`PipeHalf`]: a
//! bounded outbound queue, an inbound queue, and the *peer's* readiness
//! signals. Delivering a message raises the peer's receivable edge;
//! consuming one raises the peer's sendable edge. That is the entire
//! wakeup protocol between two connected sockets.
//!
//! Pipe operations never block; protocols run them inside the socket's
//! execution context.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use filament_core::message::Msg;
use filament_core::signal::Signal;

static NEXT_PIPE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique pipe identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeId(u64);

impl PipeId {
    fn fresh() -> Self {
        Self(NEXT_PIPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wire encoding used by raw reply routing.
    #[must_use]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Inverse of [`PipeId::to_raw`].
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipe-{}", self.0)
    }
}

/// Why a non-blocking pipe operation did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PipeError {
    /// Outbound queue is full.
    #[error("outbound queue full")]
    Full,
    /// Inbound queue is empty.
    #[error("inbound queue empty")]
    Empty,
    /// The peer half was dropped; the pipe is dead.
    #[error("peer half dropped")]
    Closed,
}

/// One socket's end of a pipe.
pub struct PipeHalf {
    id: PipeId,
    tx: flume::Sender<Msg>,
    rx: flume::Receiver<Msg>,
    peer_recv_signal: Arc<Signal>,
    peer_send_signal: Arc<Signal>,
    send_priority: u8,
    recv_priority: u8,
    // Dropped with the half; the connecting endpoint watches the other
    // side's sender to detect a broken pipe.
    _watch: flume::Sender<()>,
}

impl PipeHalf {
    /// Pipe identity; both halves share it.
    #[must_use]
    pub fn id(&self) -> PipeId {
        self.id
    }

    /// Outbound priority class (1 = highest).
    #[must_use]
    pub fn send_priority(&self) -> u8 {
        self.send_priority
    }

    /// Inbound priority class (1 = highest).
    #[must_use]
    pub fn recv_priority(&self) -> u8 {
        self.recv_priority
    }

    /// Queue a message to the peer and raise its receivable edge.
    pub fn send(&self, msg: Msg) -> Result<(), (Msg, PipeError)> {
        match self.tx.try_send(msg) {
            Ok(()) => {
                self.peer_recv_signal.raise();
                Ok(())
            }
            Err(flume::TrySendError::Full(msg)) => Err((msg, PipeError::Full)),
            Err(flume::TrySendError::Disconnected(msg)) => Err((msg, PipeError::Closed)),
        }
    }

    /// Messages currently queued for this half.
    #[cfg(test)]
    pub(crate) fn inbound_len(&self) -> usize {
        self.rx.len()
    }

    /// Take the next inbound message, raising the peer's sendable edge on
    /// success (queue space was freed).
    pub fn recv(&self) -> Result<Msg, PipeError> {
        match self.rx.try_recv() {
            Ok(msg) => {
                self.peer_send_signal.raise();
                Ok(msg)
            }
            Err(flume::TryRecvError::Empty) => Err(PipeError::Empty),
            Err(flume::TryRecvError::Disconnected) => Err(PipeError::Closed),
        }
    }
}

impl fmt::Debug for PipeHalf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeHalf")
            .field("id", &self.id)
            .field("send_priority", &self.send_priority)
            .field("recv_priority", &self.recv_priority)
            .finish_non_exhaustive()
    }
}

/// Per-side configuration for [`pipe_pair`].
pub struct PipeSideCfg {
    /// Signal raised when a message arrives for this side.
    pub recv_signal: Arc<Signal>,
    /// Signal raised when this side gains outbound queue space.
    pub send_signal: Arc<Signal>,
    /// Capacity, in messages, of this side's inbound queue.
    pub recv_capacity: usize,
    /// Outbound priority this side assigns to the pipe.
    pub send_priority: u8,
    /// Inbound priority this side assigns to the pipe.
    pub recv_priority: u8,
}

/// Watch handles for a pipe; the connecting endpoint uses these to learn
/// when either half is dropped.
pub struct PipeMonitor {
    /// Disconnects when half `a` is dropped.
    pub a_closed: flume::Receiver<()>,
    /// Disconnects when half `b` is dropped.
    pub b_closed: flume::Receiver<()>,
}

/// Create a connected pair of pipe halves.
#[must_use]
pub fn pipe_pair(a: PipeSideCfg, b: PipeSideCfg) -> (PipeHalf, PipeHalf, PipeMonitor) {
    let id = PipeId::fresh();
    let (a_to_b_tx, a_to_b_rx) = flume::bounded(b.recv_capacity.max(1));
    let (b_to_a_tx, b_to_a_rx) = flume::bounded(a.recv_capacity.max(1));
    let (watch_a_tx, a_closed) = flume::bounded(0);
    let (watch_b_tx, b_closed) = flume::bounded(0);

    let half_a = PipeHalf {
        id,
        tx: a_to_b_tx,
        rx: b_to_a_rx,
        peer_recv_signal: b.recv_signal,
        peer_send_signal: b.send_signal,
        send_priority: a.send_priority,
        recv_priority: a.recv_priority,
        _watch: watch_a_tx,
    };
    let half_b = PipeHalf {
        id,
        tx: b_to_a_tx,
        rx: a_to_b_rx,
        peer_recv_signal: a.recv_signal,
        peer_send_signal: a.send_signal,
        send_priority: b.send_priority,
        recv_priority: b.recv_priority,
        _watch: watch_b_tx,
    };
    (half_a, half_b, PipeMonitor { a_closed, b_closed })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(capacity: usize) -> (PipeSideCfg, Arc<Signal>, Arc<Signal>) {
        let recv_signal = Arc::new(Signal::new());
        let send_signal = Arc::new(Signal::new());
        (
            PipeSideCfg {
                recv_signal: Arc::clone(&recv_signal),
                send_signal: Arc::clone(&send_signal),
                recv_capacity: capacity,
                send_priority: 8,
                recv_priority: 8,
            },
            recv_signal,
            send_signal,
        )
    }

    #[test]
    fn test_round_trip_raises_peer_signals() {
        let (cfg_a, a_recv, _a_send) = cfg(4);
        let (cfg_b, b_recv, b_send) = cfg(4);
        let (a, b, _mon) = pipe_pair(cfg_a, cfg_b);

        a.send(Msg::from_chunk(b"hello")).unwrap();
        assert!(b_recv.wait(None).is_ok(), "receivable edge raised for b");

        let msg = b.recv().unwrap();
        assert_eq!(msg.body(), b"hello");
        // b consuming does not signal b; it signals a's send side... and a
        // receiving b's traffic signals a's recv side.
        b.send(Msg::from_chunk(b"world")).unwrap();
        assert!(a_recv.wait(None).is_ok());
        a.recv().unwrap();
        assert!(b_send.wait(None).is_ok(), "sendable edge raised for b");
    }

    #[test]
    fn test_full_queue_would_block() {
        let (cfg_a, _, _) = cfg(4);
        let (cfg_b, _, _) = cfg(1);
        let (a, _b, _mon) = pipe_pair(cfg_a, cfg_b);

        a.send(Msg::from_chunk(b"1")).unwrap();
        let (msg, err) = a.send(Msg::from_chunk(b"2")).unwrap_err();
        assert_eq!(err, PipeError::Full);
        assert_eq!(msg.body(), b"2");
    }

    #[test]
    fn test_closed_peer_detected() {
        let (cfg_a, _, _) = cfg(4);
        let (cfg_b, _, _) = cfg(4);
        let (a, b, mon) = pipe_pair(cfg_a, cfg_b);

        drop(b);
        assert!(matches!(
            mon.b_closed.recv(),
            Err(flume::RecvError::Disconnected)
        ));
        let (_, err) = a.send(Msg::from_chunk(b"x")).unwrap_err();
        assert_eq!(err, PipeError::Closed);
        assert_eq!(a.recv().unwrap_err(), PipeError::Closed);
    }

    #[test]
    fn test_empty_queue() {
        let (cfg_a, _, _) = cfg(4);
        let (cfg_b, _, _) = cfg(4);
        let (a, _b, _mon) = pipe_pair(cfg_a, cfg_b);
        assert_eq!(a.recv().unwrap_err(), PipeError::Empty);
    }
}
