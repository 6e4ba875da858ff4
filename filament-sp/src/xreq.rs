//! Raw request-side distribution.
//!
//! [`Xreq`] owns a socket's set of pipes and implements the two traffic
//! policies shared by the whole request side of the family:
//! priority-aware load balancing for outbound messages and fair queueing
//! for inbound ones. The cooked REQ state machine drives an `Xreq`
//! internally; [`XreqProto`] exposes the same policies directly as the
//! raw socket type, headers untouched.

use filament_core::error::{Result, SpError};
use filament_core::message::Msg;
use smallvec::SmallVec;
use tracing::trace;

use crate::pipe::{PipeError, PipeHalf, PipeId};
use crate::protocol::{ProtoCtx, Protocol};

/// Pipe set with load-balanced send and fair-queued recv.
#[derive(Default)]
pub struct Xreq {
    pipes: Vec<PipeHalf>,
    send_cursor: usize,
    recv_cursor: usize,
}

impl Xreq {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of attached pipes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }

    pub fn add_pipe(&mut self, pipe: PipeHalf) {
        self.pipes.push(pipe);
    }

    /// Detach a pipe by id. Returns `false` if it was not attached.
    pub fn remove_pipe(&mut self, id: PipeId) -> bool {
        match self.pipes.iter().position(|p| p.id() == id) {
            Some(idx) => {
                self.pipes.remove(idx);
                // Cursors only pick a starting point; clamping keeps the
                // modulo arithmetic in range.
                self.send_cursor = 0;
                self.recv_cursor = 0;
                true
            }
            None => false,
        }
    }

    /// Send to the highest-priority pipe that will take the message,
    /// rotating within a priority class across calls.
    ///
    /// On success returns the id of the pipe used. Dead pipes discovered
    /// along the way are pruned.
    pub fn send_any(&mut self, mut msg: Msg) -> std::result::Result<PipeId, (Msg, SpError)> {
        let mut classes: SmallVec<[u8; 4]> =
            self.pipes.iter().map(PipeHalf::send_priority).collect();
        classes.sort_unstable();
        classes.dedup();

        let mut dead: SmallVec<[PipeId; 2]> = SmallVec::new();
        for class in classes {
            let n = self.pipes.len();
            for step in 0..n {
                let idx = (self.send_cursor + step) % n;
                let pipe = &self.pipes[idx];
                if pipe.send_priority() != class || dead.contains(&pipe.id()) {
                    continue;
                }
                match pipe.send(msg) {
                    Ok(()) => {
                        self.send_cursor = (idx + 1) % n;
                        let used = pipe.id();
                        self.prune(&dead);
                        return Ok(used);
                    }
                    Err((m, PipeError::Full)) => msg = m,
                    Err((m, PipeError::Closed)) => {
                        dead.push(pipe.id());
                        msg = m;
                    }
                    Err((_, PipeError::Empty)) => unreachable!("send cannot report Empty"),
                }
            }
        }
        self.prune(&dead);
        Err((msg, SpError::WouldBlock))
    }

    /// Send to one specific pipe, for routed replies. The message comes
    /// back with [`SpError::WouldBlock`] when the pipe is missing, dead
    /// or full; routed-reply callers typically drop it then.
    pub fn send_to(&mut self, id: PipeId, msg: Msg) -> std::result::Result<(), (Msg, SpError)> {
        let Some(pipe) = self.pipes.iter().find(|p| p.id() == id) else {
            return Err((msg, SpError::WouldBlock));
        };
        match pipe.send(msg) {
            Ok(()) => Ok(()),
            Err((m, PipeError::Full)) => Err((m, SpError::WouldBlock)),
            Err((m, PipeError::Closed)) => {
                self.remove_pipe(id);
                Err((m, SpError::WouldBlock))
            }
            Err((_, PipeError::Empty)) => unreachable!("send cannot report Empty"),
        }
    }

    fn prune(&mut self, dead: &[PipeId]) {
        for &id in dead {
            trace!("[XREQ] pruning dead {}", id);
            self.remove_pipe(id);
        }
    }

    /// Fair-queue one inbound message, preferring lower priority numbers
    /// and rotating within a class across calls.
    pub fn recv_any(&mut self) -> Result<(Msg, PipeId)> {
        let mut classes: SmallVec<[u8; 4]> =
            self.pipes.iter().map(PipeHalf::recv_priority).collect();
        classes.sort_unstable();
        classes.dedup();

        let mut dead: SmallVec<[PipeId; 2]> = SmallVec::new();
        let mut got = None;
        'classes: for class in classes {
            let n = self.pipes.len();
            for step in 0..n {
                let idx = (self.recv_cursor + step) % n;
                let pipe = &self.pipes[idx];
                if pipe.recv_priority() != class || dead.contains(&pipe.id()) {
                    continue;
                }
                match pipe.recv() {
                    Ok(msg) => {
                        self.recv_cursor = (idx + 1) % n;
                        got = Some((msg, pipe.id()));
                        break 'classes;
                    }
                    Err(PipeError::Empty) => {}
                    Err(PipeError::Closed) => dead.push(pipe.id()),
                    Err(PipeError::Full) => unreachable!("recv cannot report Full"),
                }
            }
        }
        self.prune(&dead);
        got.ok_or(SpError::WouldBlock)
    }
}

/// Raw request socket: load-balanced send, fair-queued recv, headers
/// passed through verbatim.
#[derive(Default)]
pub struct XreqProto {
    lb: Xreq,
}

impl XreqProto {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Protocol for XreqProto {
    fn send(&mut self, ctx: &mut ProtoCtx<'_>, msg: Msg) -> std::result::Result<(), (Msg, SpError)> {
        let bytes = msg.len();
        self.lb.send_any(msg)?;
        ctx.stats.count_send(bytes);
        Ok(())
    }

    fn recv(&mut self, ctx: &mut ProtoCtx<'_>) -> Result<Msg> {
        let (msg, _) = self.lb.recv_any()?;
        ctx.stats.count_recv(msg.len());
        Ok(msg)
    }

    fn add_pipe(&mut self, ctx: &mut ProtoCtx<'_>, pipe: PipeHalf) {
        self.lb.add_pipe(pipe);
        ctx.send_signal.raise();
    }

    fn remove_pipe(&mut self, _ctx: &mut ProtoCtx<'_>, id: PipeId) {
        self.lb.remove_pipe(id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use filament_core::signal::Signal;

    use super::*;
    use crate::pipe::{pipe_pair, PipeSideCfg};

    fn side(send_priority: u8, recv_priority: u8) -> PipeSideCfg {
        PipeSideCfg {
            recv_signal: Arc::new(Signal::new()),
            send_signal: Arc::new(Signal::new()),
            recv_capacity: 8,
            send_priority,
            recv_priority,
        }
    }

    fn attach(lb: &mut Xreq, send_priority: u8) -> PipeHalf {
        let (local, remote, _mon) = pipe_pair(side(send_priority, 8), side(8, 8));
        lb.add_pipe(local);
        remote
    }

    #[test]
    fn test_round_robin_within_class() {
        let mut lb = Xreq::new();
        let r1 = attach(&mut lb, 8);
        let r2 = attach(&mut lb, 8);

        lb.send_any(Msg::from_chunk(b"a")).unwrap();
        lb.send_any(Msg::from_chunk(b"b")).unwrap();
        lb.send_any(Msg::from_chunk(b"c")).unwrap();

        // Alternating delivery: two on one peer, one on the other.
        let c1 = r1.inbound_len();
        let c2 = r2.inbound_len();
        assert_eq!(c1 + c2, 3);
        assert!(c1 >= 1 && c2 >= 1, "both peers saw traffic");
    }

    #[test]
    fn test_higher_priority_class_wins() {
        let mut lb = Xreq::new();
        let low = attach(&mut lb, 8);
        let high = attach(&mut lb, 1);

        for _ in 0..3 {
            lb.send_any(Msg::from_chunk(b"x")).unwrap();
        }
        assert_eq!(high.inbound_len(), 3);
        assert_eq!(low.inbound_len(), 0);
    }

    #[test]
    fn test_no_pipes_would_block() {
        let mut lb = Xreq::new();
        let (_, err) = lb.send_any(Msg::from_chunk(b"x")).unwrap_err();
        assert_eq!(err, SpError::WouldBlock);
        assert_eq!(lb.recv_any().unwrap_err(), SpError::WouldBlock);
    }

    #[test]
    fn test_dead_pipe_pruned() {
        let mut lb = Xreq::new();
        let remote = attach(&mut lb, 8);
        drop(remote);
        let (_, err) = lb.send_any(Msg::from_chunk(b"x")).unwrap_err();
        assert_eq!(err, SpError::WouldBlock);
        assert!(lb.is_empty());
    }

    #[test]
    fn test_fair_queue_recv() {
        let mut lb = Xreq::new();
        let r1 = attach(&mut lb, 8);
        let r2 = attach(&mut lb, 8);
        r1.send(Msg::from_chunk(b"one")).unwrap();
        r2.send(Msg::from_chunk(b"two")).unwrap();

        let (m1, p1) = lb.recv_any().unwrap();
        let (m2, p2) = lb.recv_any().unwrap();
        assert_ne!(p1, p2, "rotation visits both pipes");
        let mut bodies = vec![m1.body().to_vec(), m2.body().to_vec()];
        bodies.sort();
        assert_eq!(bodies, vec![b"one".to_vec(), b"two".to_vec()]);
    }
}
