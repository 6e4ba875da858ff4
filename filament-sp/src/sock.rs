//! Socket core: lifecycle state machine, blocking surface, option
//! dispatch.
//!
//! All mutable socket state lives behind one mutex: holding it *is* the
//! socket's execution context, and every protocol callback runs inside
//! it. Blocking `send`/`recv` loop over the protocol's non-blocking
//! primitives, parking on the socket's edge-triggered readiness signals
//! between attempts with the lock released.
//!
//! Shutdown runs through explicit states: `StoppingEndpoints` while
//! transport sessions confirm their stops, then `Stopping` while the
//! protocol winds down its timers, then `Done`, at which point the
//! thread blocked in `close` is released. A zombified socket stays fully
//! constructed but refuses every operation with
//! [`SpError::Terminated`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use filament_core::error::{Result, SpError};
use filament_core::message::Msg;
use filament_core::options::{GenericOption, SocketOptions};
use filament_core::signal::{deadline_after, Signal};
use filament_core::stats::SocketStats;
use filament_core::timer::{TimerEvent, TimerHandle, TimerSink};
use tracing::{debug, trace};

use crate::endpoint::Endpoint;
use crate::pipe::{PipeHalf, PipeId, PipeSideCfg};
use crate::protocol::{Domain, ProtoCtx, ProtoOption, Protocol, SocketTypeSpec};
use crate::transport::{OptionSet, StopResult, Transport, TransportCtx};

/// Socket lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SockState {
    Active,
    /// Context terminated; every operation fails with `Terminated`.
    Zombie,
    /// Closing: waiting for endpoint stop confirmations.
    StoppingEndpoints,
    /// Closing: waiting for the protocol to wind down.
    Stopping,
    /// Fully closed.
    Done,
}

struct Inner {
    state: SockState,
    proto: Box<dyn Protocol>,
    eps: Vec<Endpoint>,
    stopping_eps: Vec<Endpoint>,
    next_ep_id: u32,
    opts: SocketOptions,
    stats: SocketStats,
    transport_opts: HashMap<&'static str, Box<dyn OptionSet>>,
    /// Releases the thread blocked in `close` once `Done` is reached.
    closer: Option<flume::Sender<()>>,
}

/// One socket. Shared between the owning context, transport workers and
/// the timer service; everything mutable is inside `inner`.
pub struct SocketCore {
    inner: parking_lot::Mutex<Inner>,
    send_signal: Arc<Signal>,
    recv_signal: Arc<Signal>,
    timer: TimerHandle,
    timer_sink: TimerSink,
    domain: Domain,
    protocol: u16,
    name: &'static str,
    can_send: bool,
    can_recv: bool,
}

impl SocketCore {
    /// Construct a socket of the given type.
    pub fn new(spec: &SocketTypeSpec, timer: TimerHandle) -> Arc<Self> {
        Arc::new_cyclic(|weak: &std::sync::Weak<Self>| {
            let weak = weak.clone();
            let timer_sink: TimerSink = Arc::new(move |event| {
                if let Some(sock) = weak.upgrade() {
                    sock.on_timer_event(event);
                }
            });
            Self {
                inner: parking_lot::Mutex::new(Inner {
                    state: SockState::Active,
                    proto: (spec.ctor)(),
                    eps: Vec::new(),
                    stopping_eps: Vec::new(),
                    next_ep_id: 1,
                    opts: SocketOptions::default(),
                    stats: SocketStats::default(),
                    transport_opts: HashMap::new(),
                    closer: None,
                }),
                send_signal: Arc::new(Signal::new()),
                recv_signal: Arc::new(Signal::new()),
                timer,
                timer_sink,
                domain: spec.domain,
                protocol: spec.protocol,
                name: spec.name,
                can_send: spec.can_send,
                can_recv: spec.can_recv,
            }
        })
    }

    /// Socket type name, e.g. `"REQ"`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Address family.
    #[must_use]
    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Protocol id within the family.
    #[must_use]
    pub fn protocol(&self) -> u16 {
        self.protocol
    }

    /// Point-in-time copy of the socket's counters.
    #[must_use]
    pub fn stats(&self) -> SocketStats {
        self.inner.lock().stats.snapshot()
    }

    fn check_alive(state: SockState) -> Result<()> {
        match state {
            SockState::Active => Ok(()),
            // A socket mid-teardown evicts callers the same way a zombie
            // does; only a fully closed socket is a stale handle.
            SockState::Done => Err(SpError::BadFileDescriptor),
            _ => Err(SpError::Terminated),
        }
    }

    /// Send one message, blocking per the socket's timeout options
    /// unless `dont_wait` is set. On failure the message is returned to
    /// the caller alongside the error.
    pub fn send(&self, msg: Msg, dont_wait: bool) -> std::result::Result<(), (Msg, SpError)> {
        let mut msg = msg;
        let mut deadline: Option<Option<Instant>> = None;
        loop {
            let mut guard = self.inner.lock();
            if let Err(e) = Self::check_alive(guard.state) {
                return Err((msg, e));
            }
            if !self.can_send {
                return Err((msg, SpError::NotSupported));
            }
            let nonblocking = dont_wait || guard.opts.is_send_nonblocking();
            // The deadline is fixed on entry; retries share it.
            let deadline =
                *deadline.get_or_insert_with(|| deadline_after(guard.opts.send_timeout));

            let inner = &mut *guard;
            let mut ctx = ProtoCtx::new(
                &self.send_signal,
                &self.recv_signal,
                &mut inner.stats,
                &self.timer,
                &self.timer_sink,
            );
            match inner.proto.send(&mut ctx, msg) {
                Ok(()) => return Ok(()),
                Err((m, SpError::WouldBlock)) if !nonblocking => {
                    drop(guard);
                    match self.send_signal.wait(deadline) {
                        Ok(()) => msg = m,
                        Err(e) => return Err((m, e)),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Receive one message, blocking per the socket's timeout options
    /// unless `dont_wait` is set.
    pub fn recv(&self, dont_wait: bool) -> Result<Msg> {
        let mut deadline: Option<Option<Instant>> = None;
        loop {
            let mut guard = self.inner.lock();
            Self::check_alive(guard.state)?;
            if !self.can_recv {
                return Err(SpError::NotSupported);
            }
            let nonblocking = dont_wait || guard.opts.is_recv_nonblocking();
            let deadline =
                *deadline.get_or_insert_with(|| deadline_after(guard.opts.recv_timeout));

            let inner = &mut *guard;
            let mut ctx = ProtoCtx::new(
                &self.send_signal,
                &self.recv_signal,
                &mut inner.stats,
                &self.timer,
                &self.timer_sink,
            );
            match inner.proto.recv(&mut ctx) {
                Ok(msg) => return Ok(msg),
                Err(SpError::WouldBlock) => {
                    if nonblocking {
                        return Err(SpError::WouldBlock);
                    }
                    drop(guard);
                    self.recv_signal.wait(deadline)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Create an endpoint through the given transport. Returns the
    /// endpoint id for a later [`SocketCore::shutdown`].
    pub fn add_endpoint(
        self: &Arc<Self>,
        transport: &dyn Transport,
        address: &str,
        rest: &str,
        bind: bool,
    ) -> Result<u32> {
        let mut guard = self.inner.lock();
        Self::check_alive(guard.state)?;
        let endpoint_id = guard.next_ep_id;
        let ctx = TransportCtx {
            sock: Arc::downgrade(self),
            endpoint_id,
            options: guard.opts.clone(),
        };
        let session = if bind {
            transport.bind(rest, ctx)?
        } else {
            transport.connect(rest, ctx)?
        };
        guard.next_ep_id += 1;
        guard
            .eps
            .push(Endpoint::new(endpoint_id, address.to_string(), session));
        debug!(
            "[SOCK] {} endpoint {} -> {}",
            self.name,
            endpoint_id,
            address
        );
        Ok(endpoint_id)
    }

    /// Begin removing one endpoint. Cleanup completes asynchronously.
    pub fn shutdown(&self, endpoint_id: u32) -> Result<()> {
        let mut guard = self.inner.lock();
        Self::check_alive(guard.state)?;
        let Some(pos) = guard.eps.iter().position(|ep| ep.id() == endpoint_id) else {
            return Err(SpError::InvalidArgument);
        };
        let mut ep = guard.eps.remove(pos);
        match ep.session_mut().request_stop() {
            StopResult::Stopped => drop(ep),
            StopResult::Pending => guard.stopping_eps.push(ep),
        }
        Ok(())
    }

    /// Confirmation from a transport worker that its endpoint is fully
    /// stopped.
    pub fn endpoint_stopped(&self, endpoint_id: u32) {
        let mut guard = self.inner.lock();
        if let Some(pos) = guard
            .stopping_eps
            .iter()
            .position(|ep| ep.id() == endpoint_id)
        {
            let ep = guard.stopping_eps.remove(pos);
            trace!("[SOCK] {} endpoint {} stopped", self.name, ep.id());
        }
        self.maybe_advance_shutdown(&mut guard);
    }

    /// Close the socket, blocking until teardown completes.
    ///
    /// [`SpError::BadFileDescriptor`] if a close is already under way or
    /// finished.
    pub fn close(&self) -> Result<()> {
        let done_rx;
        {
            let mut guard = self.inner.lock();
            match guard.state {
                SockState::Active | SockState::Zombie => {}
                _ => return Err(SpError::BadFileDescriptor),
            }
            // Wake and permanently fail every blocked sender/receiver.
            self.send_signal.close();
            self.recv_signal.close();
            guard.state = SockState::StoppingEndpoints;
            let (tx, rx) = flume::bounded(1);
            guard.closer = Some(tx);
            done_rx = rx;

            let eps = std::mem::take(&mut guard.eps);
            for mut ep in eps {
                match ep.session_mut().request_stop() {
                    StopResult::Stopped => drop(ep),
                    StopResult::Pending => guard.stopping_eps.push(ep),
                }
            }
            self.maybe_advance_shutdown(&mut guard);
        }
        let _ = done_rx.recv();
        debug!("[SOCK] {} closed", self.name);
        Ok(())
    }

    /// Poison the socket: the owning context is shutting down. The slot
    /// stays allocated until the application closes it.
    pub fn zombify(&self) {
        let mut guard = self.inner.lock();
        if guard.state == SockState::Active {
            guard.state = SockState::Zombie;
            self.send_signal.close();
            self.recv_signal.close();
            debug!("[SOCK] {} zombified", self.name);
        }
    }

    fn maybe_advance_shutdown(&self, guard: &mut Inner) {
        if guard.state == SockState::StoppingEndpoints && guard.stopping_eps.is_empty() {
            guard.state = SockState::Stopping;
            let inner = &mut *guard;
            let mut ctx = ProtoCtx::new(
                &self.send_signal,
                &self.recv_signal,
                &mut inner.stats,
                &self.timer,
                &self.timer_sink,
            );
            if inner.proto.stop(&mut ctx) {
                Self::finish_close(guard);
            }
        } else if guard.state == SockState::Stopping && guard.proto.stopped() {
            Self::finish_close(guard);
        }
    }

    fn finish_close(guard: &mut Inner) {
        guard.state = SockState::Done;
        if let Some(tx) = guard.closer.take() {
            let _ = tx.send(());
        }
    }

    /// Attach a pipe from a transport. Returns `false` when the socket
    /// is no longer accepting pipes; the caller drops its half.
    pub fn add_pipe(&self, pipe: PipeHalf, accepted: bool) -> bool {
        let mut guard = self.inner.lock();
        if guard.state != SockState::Active {
            return false;
        }
        let inner = &mut *guard;
        inner.stats.pipe_attached(accepted);
        let mut ctx = ProtoCtx::new(
            &self.send_signal,
            &self.recv_signal,
            &mut inner.stats,
            &self.timer,
            &self.timer_sink,
        );
        inner.proto.add_pipe(&mut ctx, pipe);
        drop(guard);
        // A fresh pipe may unblock either direction.
        self.send_signal.raise();
        self.recv_signal.raise();
        true
    }

    /// Detach a pipe. `broken` marks an error-path disconnect for the
    /// statistics.
    pub fn remove_pipe(&self, id: PipeId, broken: bool) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.stats.pipe_detached(broken);
        let mut ctx = ProtoCtx::new(
            &self.send_signal,
            &self.recv_signal,
            &mut inner.stats,
            &self.timer,
            &self.timer_sink,
        );
        inner.proto.remove_pipe(&mut ctx, id);
    }

    fn on_timer_event(&self, event: TimerEvent) {
        let mut guard = self.inner.lock();
        if guard.state == SockState::Done || guard.state == SockState::Zombie {
            return;
        }
        let inner = &mut *guard;
        let mut ctx = ProtoCtx::new(
            &self.send_signal,
            &self.recv_signal,
            &mut inner.stats,
            &self.timer,
            &self.timer_sink,
        );
        inner.proto.on_timer(&mut ctx, event);
        if guard.state == SockState::Stopping && guard.proto.stopped() {
            Self::finish_close(&mut guard);
        }
    }

    /// Pipe-side configuration a transport uses when wiring this socket
    /// into a new pipe.
    #[must_use]
    pub fn pipe_side_cfg(&self) -> PipeSideCfg {
        let guard = self.inner.lock();
        PipeSideCfg {
            recv_signal: Arc::clone(&self.recv_signal),
            send_signal: Arc::clone(&self.send_signal),
            recv_capacity: pipe_capacity(&guard.opts),
            send_priority: guard.opts.send_priority,
            recv_priority: guard.opts.recv_priority,
        }
    }

    /// Set a generic (socket-level) option.
    pub fn set_option(&self, opt: GenericOption, value: i64) -> Result<()> {
        let mut guard = self.inner.lock();
        Self::check_alive(guard.state)?;
        guard.opts.set(opt, value)
    }

    /// Read a generic option.
    pub fn get_option(&self, opt: GenericOption) -> Result<i64> {
        let guard = self.inner.lock();
        Self::check_alive(guard.state)?;
        Ok(guard.opts.get(opt))
    }

    /// Set a protocol-level option.
    pub fn set_proto_option(&self, opt: ProtoOption, value: i64) -> Result<()> {
        let mut guard = self.inner.lock();
        Self::check_alive(guard.state)?;
        guard.proto.set_option(opt, value)
    }

    /// Read a protocol-level option.
    pub fn get_proto_option(&self, opt: ProtoOption) -> Result<i64> {
        let guard = self.inner.lock();
        Self::check_alive(guard.state)?;
        guard.proto.get_option(opt)
    }

    /// Set a transport-level option; storage is created lazily per
    /// transport.
    pub fn set_transport_option(
        &self,
        transport: &dyn Transport,
        option: u32,
        value: i64,
    ) -> Result<()> {
        let mut guard = self.inner.lock();
        Self::check_alive(guard.state)?;
        let scheme = transport.scheme();
        if !guard.transport_opts.contains_key(scheme) {
            let Some(set) = transport.option_set() else {
                return Err(SpError::NotSupported);
            };
            guard.transport_opts.insert(scheme, set);
        }
        match guard.transport_opts.get_mut(scheme) {
            Some(set) => set.set(option, value),
            None => Err(SpError::NotSupported),
        }
    }

    /// Read a transport-level option.
    pub fn get_transport_option(&self, transport: &dyn Transport, option: u32) -> Result<i64> {
        let guard = self.inner.lock();
        Self::check_alive(guard.state)?;
        match guard.transport_opts.get(transport.scheme()) {
            Some(set) => set.get(option),
            None => Err(SpError::NotSupported),
        }
    }
}

/// Pipe queue depth derived from the receive buffer option, in
/// messages.
fn pipe_capacity(opts: &SocketOptions) -> usize {
    (opts.recv_buffer / 1024).max(16)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use filament_core::timer::TimerService;

    use super::*;
    use crate::req::ReqProto;
    use crate::transport::Session;

    fn req_spec() -> SocketTypeSpec {
        SocketTypeSpec {
            domain: Domain::Sp,
            protocol: crate::protocol::REQ,
            name: "REQ",
            can_send: true,
            can_recv: true,
            ctor: || Box::new(ReqProto::new()),
        }
    }

    /// Session whose stop only completes once the test calls
    /// `endpoint_stopped`, keeping the socket in `StoppingEndpoints`.
    struct StallSession;

    impl Session for StallSession {
        fn request_stop(&mut self) -> StopResult {
            StopResult::Pending
        }
    }

    struct StallTransport;

    impl Transport for StallTransport {
        fn scheme(&self) -> &'static str {
            "stall"
        }

        fn bind(&self, _rest: &str, _ctx: TransportCtx) -> Result<Box<dyn Session>> {
            Ok(Box::new(StallSession))
        }

        fn connect(&self, _rest: &str, _ctx: TransportCtx) -> Result<Box<dyn Session>> {
            Ok(Box::new(StallSession))
        }
    }

    #[test]
    fn test_zombify_poisons_operations() {
        let timer = TimerService::new();
        let sock = SocketCore::new(&req_spec(), timer.handle());
        sock.zombify();
        let (_, err) = sock.send(Msg::from_chunk(b"x"), false).unwrap_err();
        assert_eq!(err, SpError::Terminated);
        assert_eq!(sock.recv(false).unwrap_err(), SpError::Terminated);
        // Zombify is idempotent, close still works.
        sock.zombify();
        sock.close().unwrap();
    }

    #[test]
    fn test_second_close_fails() {
        let timer = TimerService::new();
        let sock = SocketCore::new(&req_spec(), timer.handle());
        sock.close().unwrap();
        assert_eq!(sock.close().unwrap_err(), SpError::BadFileDescriptor);
    }

    #[test]
    fn test_recv_timeout_reports_would_block() {
        let timer = TimerService::new();
        let sock = SocketCore::new(&req_spec(), timer.handle());
        sock.set_option(GenericOption::RecvTimeout, 20).unwrap();
        sock.send(Msg::from_chunk(b"ping"), false).unwrap();
        let start = std::time::Instant::now();
        assert_eq!(sock.recv(false).unwrap_err(), SpError::WouldBlock);
        assert!(start.elapsed() >= Duration::from_millis(20));
        sock.close().unwrap();
    }

    #[test]
    fn test_teardown_in_progress_reports_terminated() {
        let timer = TimerService::new();
        let sock = SocketCore::new(&req_spec(), timer.handle());
        let ep = sock
            .add_endpoint(&StallTransport, "stall://x", "x", false)
            .unwrap();

        std::thread::scope(|scope| {
            let closer = scope.spawn(|| sock.close());

            // Wait for close to move the socket out of Active; with no
            // request in flight an Active REQ reports BadState instead.
            let deadline = Instant::now() + Duration::from_secs(2);
            loop {
                match sock.recv(true) {
                    Err(SpError::Terminated) => break,
                    Err(SpError::BadState) => std::thread::sleep(Duration::from_millis(1)),
                    other => panic!("unexpected recv result: {other:?}"),
                }
                assert!(Instant::now() < deadline, "close never left Active");
            }
            let (_, err) = sock.send(Msg::from_chunk(b"x"), true).unwrap_err();
            assert_eq!(err, SpError::Terminated);

            sock.endpoint_stopped(ep);
            assert!(closer.join().unwrap().is_ok());
        });
    }

    #[test]
    fn test_recv_without_request_is_a_state_error() {
        let timer = TimerService::new();
        let sock = SocketCore::new(&req_spec(), timer.handle());
        assert_eq!(sock.recv(true).unwrap_err(), SpError::BadState);
        sock.close().unwrap();
    }
}
