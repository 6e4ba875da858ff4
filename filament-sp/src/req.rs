//! REQ: reliable request/reply, requester side.
//!
//! The protocol is written as a pure transition function over an explicit
//! state enum plus a driver that executes the resulting effects. The
//! transition table is data; every side effect (tagging, pipe I/O, timer
//! scheduling) happens in the driver, so the whole state machine is
//! testable without sockets or threads.
//!
//! Lifecycle of one request: `send` stores the payload and tags it with a
//! fresh correlation id; the machine tries to push it to a pipe, parking
//! in `Delayed` until one is available; once sent it sits in `Active`
//! with a resend timer running. A matching reply stops the timer and is
//! handed out by `recv`; a timeout, or loss of the pipe the request went
//! out on, resends the same request. Sending again at any point cancels
//! the outstanding request and starts over with a new id.
//!
//! Timer stops are asynchronous and always confirmed, so "waiting for the
//! timer to stop" is itself a pair of states (`TimedOut`, `Cancelling`,
//! `StoppingTimer`) rather than a flag.

use std::time::Duration;

use filament_core::error::{Result, SpError};
use filament_core::message::Msg;
use filament_core::timer::{TimerEvent, TimerToken};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::pipe::{PipeHalf, PipeId};
use crate::protocol::{ProtoCtx, ProtoOption, Protocol};
use crate::xreq::Xreq;

/// Default interval before an unanswered request is resent.
pub const DEFAULT_RESEND_IVL: Duration = Duration::from_secs(60);

/// Top bit of a correlation id; marks the end of a backtrace stack.
pub const TAG_MARKER: u32 = 0x8000_0000;

/// REQ protocol states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqState {
    /// Created, not yet started.
    Idle,
    /// No request in flight.
    Passive,
    /// Request tagged but no pipe would take it yet.
    Delayed,
    /// Request sent; resend timer running, awaiting the reply.
    Active,
    /// Timer fired (or the carrying pipe died); waiting for the stop
    /// confirmation before resending.
    TimedOut,
    /// A new `send` superseded the in-flight request; waiting for the
    /// stop confirmation before starting over.
    Cancelling,
    /// Reply arrived; waiting for the stop confirmation before handing
    /// it out.
    StoppingTimer,
    /// Reply stored and ready for `recv`.
    Done,
}

/// Inputs to the transition function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqEvent {
    /// Machine start.
    Start,
    /// Application submitted a (new) request.
    SendRequest,
    /// The tagged request was accepted by a pipe.
    SendSucceeded,
    /// No pipe would take the request right now.
    SendBlocked,
    /// A pipe became available while parked in `Delayed`.
    PipeAvailable,
    /// A reply matching the current id was received.
    ReplyReceived,
    /// The resend timer fired.
    Timeout,
    /// The timer service confirmed a stop request.
    TimerStopConfirmed,
    /// The pipe carrying the in-flight request was removed.
    ActivePipeRemoved,
    /// The application collected the stored reply.
    ReplyRetrieved,
}

/// Side effects requested by a transition, executed by the driver in
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqEffect {
    /// Assign a fresh correlation id and re-tag the stored request.
    TagNewRequest,
    /// Attempt to hand the stored request to a pipe; feeds back
    /// `SendSucceeded` or `SendBlocked`.
    TrySend,
    /// Start the resend timer.
    StartResendTimer,
    /// Request a timer stop; feeds back `TimerStopConfirmed`, possibly
    /// asynchronously.
    StopResendTimer,
    /// Drop a stored reply that was never collected.
    DiscardStoredReply,
    /// Wake a receiver parked on the socket: the reply is collectable.
    ReplyReady,
}

type Effects = SmallVec<[ReqEffect; 2]>;

/// The REQ transition function. Pure: no I/O, no clocks.
///
/// Unlisted (state, event) pairs are no-ops; stale timer events in
/// particular must be ignorable.
#[must_use]
pub fn transition(state: ReqState, event: ReqEvent) -> (ReqState, Effects) {
    use ReqEffect as F;
    use ReqEvent as E;
    use ReqState as S;

    let mut fx = Effects::new();
    let next = match (state, event) {
        (S::Idle, E::Start) => S::Passive,

        (S::Passive | S::Delayed, E::SendRequest) => {
            fx.push(F::TagNewRequest);
            fx.push(F::TrySend);
            S::Passive
        }
        (S::Passive, E::SendSucceeded) => {
            fx.push(F::StartResendTimer);
            S::Active
        }
        (S::Passive, E::SendBlocked) => S::Delayed,

        (S::Delayed, E::PipeAvailable) => {
            fx.push(F::TrySend);
            S::Delayed
        }
        (S::Delayed, E::SendSucceeded) => {
            fx.push(F::StartResendTimer);
            S::Active
        }
        (S::Delayed, E::SendBlocked) => S::Delayed,

        (S::Active, E::ReplyReceived) => {
            fx.push(F::StopResendTimer);
            S::StoppingTimer
        }
        (S::Active, E::Timeout | E::ActivePipeRemoved) => {
            fx.push(F::StopResendTimer);
            S::TimedOut
        }
        (S::Active, E::SendRequest) => {
            fx.push(F::StopResendTimer);
            S::Cancelling
        }

        // Resend keeps the current id: the peer may yet answer the
        // original transmission.
        (S::TimedOut, E::TimerStopConfirmed) => {
            fx.push(F::TrySend);
            S::Passive
        }
        (S::TimedOut, E::SendRequest) => S::Cancelling,

        (S::Cancelling, E::TimerStopConfirmed) => {
            fx.push(F::TagNewRequest);
            fx.push(F::TrySend);
            S::Passive
        }
        (S::Cancelling, E::SendRequest) => S::Cancelling,

        (S::StoppingTimer, E::TimerStopConfirmed) => {
            fx.push(F::ReplyReady);
            S::Done
        }
        (S::StoppingTimer, E::SendRequest) => {
            fx.push(F::DiscardStoredReply);
            S::Cancelling
        }

        (S::Done, E::ReplyRetrieved) => S::Passive,
        (S::Done, E::SendRequest) => {
            fx.push(F::DiscardStoredReply);
            fx.push(F::StopResendTimer);
            S::Cancelling
        }

        (s, _) => s,
    };
    (next, fx)
}

/// Driver: owns the request/reply buffers, the pipe set and the timer
/// bookkeeping, and runs the transition function to completion on every
/// external stimulus.
pub struct ReqProto {
    state: ReqState,
    lb: Xreq,
    /// Tagged request, retained for resends.
    request: Option<Msg>,
    /// Stored reply, header already stripped.
    reply: Option<Msg>,
    request_id: u32,
    active_pipe: Option<PipeId>,
    timer: Option<TimerToken>,
    pending_stop: Option<TimerToken>,
    resend_ivl: Duration,
    stopping: bool,
}

impl ReqProto {
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(rand::random::<u32>())
    }

    /// Construct with an explicit id seed; ids are 31-bit and increment
    /// per request.
    #[must_use]
    pub fn with_seed(seed: u32) -> Self {
        let (state, _) = transition(ReqState::Idle, ReqEvent::Start);
        Self {
            state,
            lb: Xreq::new(),
            request: None,
            reply: None,
            request_id: seed & !TAG_MARKER,
            active_pipe: None,
            timer: None,
            pending_stop: None,
            resend_ivl: DEFAULT_RESEND_IVL,
            stopping: false,
        }
    }

    /// Current state, for tests and diagnostics.
    #[must_use]
    pub fn state(&self) -> ReqState {
        self.state
    }

    /// Correlation tag of the current request (marker bit included).
    #[must_use]
    pub fn current_tag(&self) -> u32 {
        self.request_id | TAG_MARKER
    }

    fn dispatch(&mut self, ctx: &mut ProtoCtx<'_>, event: ReqEvent) {
        let mut queue: SmallVec<[ReqEvent; 4]> = SmallVec::new();
        queue.push(event);
        while !queue.is_empty() {
            let ev = queue.remove(0);
            let (next, effects) = transition(self.state, ev);
            if next != self.state {
                trace!("[REQ] {:?} --{:?}--> {:?}", self.state, ev, next);
            }
            self.state = next;
            for effect in effects {
                match effect {
                    ReqEffect::TagNewRequest => self.tag_new_request(),
                    ReqEffect::TrySend => {
                        let outcome = self.try_send(ctx);
                        queue.push(outcome);
                    }
                    ReqEffect::StartResendTimer => {
                        self.timer = Some(ctx.schedule_timer(self.resend_ivl));
                    }
                    ReqEffect::StopResendTimer => {
                        if let Some(token) = self.timer.take() {
                            ctx.stop_timer(token);
                            self.pending_stop = Some(token);
                        } else {
                            // Nothing running (it already fired); confirm
                            // inline so the machine keeps moving.
                            queue.push(ReqEvent::TimerStopConfirmed);
                        }
                    }
                    ReqEffect::DiscardStoredReply => {
                        if self.reply.take().is_some() {
                            debug!("[REQ] discarding uncollected reply");
                        }
                    }
                    ReqEffect::ReplyReady => ctx.recv_signal.raise(),
                }
            }
        }
    }

    fn tag_new_request(&mut self) {
        self.request_id = self.request_id.wrapping_add(1) & !TAG_MARKER;
        let tag = self.current_tag();
        if let Some(request) = self.request.as_mut() {
            request.set_header(tag.to_be_bytes());
        }
        self.active_pipe = None;
    }

    fn try_send(&mut self, ctx: &mut ProtoCtx<'_>) -> ReqEvent {
        let Some(request) = self.request.as_ref() else {
            return ReqEvent::SendBlocked;
        };
        let copy = request.clone();
        let bytes = copy.len();
        match self.lb.send_any(copy) {
            Ok(pipe) => {
                self.active_pipe = Some(pipe);
                ctx.stats.count_send(bytes);
                trace!("[REQ] request 0x{:08x} out via {}", self.current_tag(), pipe);
                ReqEvent::SendSucceeded
            }
            Err((_, _)) => ReqEvent::SendBlocked,
        }
    }

    /// Drain inbound pipes. A reply matching the current tag while the
    /// request is in flight is stored; everything else (stale ids,
    /// malformed headers) is dropped silently.
    fn drain_replies(&mut self, ctx: &mut ProtoCtx<'_>) {
        loop {
            if self.state != ReqState::Active {
                // Replies can only match in Active; anything queued in
                // other states is stale by definition.
                match self.lb.recv_any() {
                    Ok((msg, pipe)) => {
                        debug!("[REQ] dropping unexpected reply from {}", pipe);
                        drop(msg);
                        continue;
                    }
                    Err(_) => return,
                }
            }
            let (mut msg, pipe) = match self.lb.recv_any() {
                Ok(got) => got,
                Err(_) => return,
            };
            let header = msg.header();
            if header.len() != 4 {
                debug!("[REQ] malformed reply header from {}, dropping", pipe);
                continue;
            }
            let mut tag = [0u8; 4];
            tag.copy_from_slice(header);
            let tag = u32::from_be_bytes(tag);
            if tag != self.current_tag() {
                debug!(
                    "[REQ] stale reply 0x{:08x} (want 0x{:08x}), dropping",
                    tag,
                    self.current_tag()
                );
                continue;
            }
            msg.set_header([]);
            ctx.stats.count_recv(msg.len());
            self.reply = Some(msg);
            self.dispatch(ctx, ReqEvent::ReplyReceived);
        }
    }
}

impl Default for ReqProto {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for ReqProto {
    /// Store and tag a new request. Always succeeds: an in-flight
    /// request is cancelled in favour of the new one.
    fn send(&mut self, ctx: &mut ProtoCtx<'_>, msg: Msg) -> std::result::Result<(), (Msg, SpError)> {
        if self.stopping {
            return Err((msg, SpError::Terminated));
        }
        self.request = Some(msg);
        self.dispatch(ctx, ReqEvent::SendRequest);
        Ok(())
    }

    fn recv(&mut self, ctx: &mut ProtoCtx<'_>) -> Result<Msg> {
        self.drain_replies(ctx);
        match self.state {
            ReqState::Done => {
                let reply = self.reply.take().ok_or(SpError::BadState)?;
                self.dispatch(ctx, ReqEvent::ReplyRetrieved);
                Ok(reply)
            }
            ReqState::Idle | ReqState::Passive => Err(SpError::BadState),
            _ => Err(SpError::WouldBlock),
        }
    }

    fn add_pipe(&mut self, ctx: &mut ProtoCtx<'_>, pipe: PipeHalf) {
        self.lb.add_pipe(pipe);
        self.dispatch(ctx, ReqEvent::PipeAvailable);
    }

    fn remove_pipe(&mut self, ctx: &mut ProtoCtx<'_>, id: PipeId) {
        self.lb.remove_pipe(id);
        if self.active_pipe == Some(id) {
            self.active_pipe = None;
            // The request went out on this pipe; the peer will never
            // answer. Resend immediately instead of waiting out the
            // timer.
            self.dispatch(ctx, ReqEvent::ActivePipeRemoved);
        }
    }

    fn on_timer(&mut self, ctx: &mut ProtoCtx<'_>, event: TimerEvent) {
        match event {
            TimerEvent::Fired(token) => {
                if self.timer == Some(token) {
                    self.timer = None;
                    if !self.stopping {
                        debug!("[REQ] request 0x{:08x} timed out", self.current_tag());
                        self.dispatch(ctx, ReqEvent::Timeout);
                    }
                }
            }
            TimerEvent::Stopped(token) => {
                if self.pending_stop == Some(token) {
                    self.pending_stop = None;
                    if !self.stopping {
                        self.dispatch(ctx, ReqEvent::TimerStopConfirmed);
                    }
                }
            }
        }
    }

    fn set_option(&mut self, opt: ProtoOption, value: i64) -> Result<()> {
        match opt {
            ProtoOption::ReqResendIvl => {
                if value <= 0 {
                    return Err(SpError::InvalidArgument);
                }
                self.resend_ivl = Duration::from_millis(value as u64);
                Ok(())
            }
        }
    }

    fn get_option(&self, opt: ProtoOption) -> Result<i64> {
        match opt {
            ProtoOption::ReqResendIvl => Ok(self.resend_ivl.as_millis() as i64),
        }
    }

    fn stop(&mut self, ctx: &mut ProtoCtx<'_>) -> bool {
        self.stopping = true;
        self.request = None;
        self.reply = None;
        if let Some(token) = self.timer.take() {
            ctx.stop_timer(token);
            self.pending_stop = Some(token);
        }
        self.pending_stop.is_none()
    }

    fn stopped(&self) -> bool {
        self.pending_stop.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fx(effects: &[ReqEffect]) -> Effects {
        effects.iter().copied().collect()
    }

    #[test]
    fn test_start_enters_passive() {
        assert_eq!(
            transition(ReqState::Idle, ReqEvent::Start),
            (ReqState::Passive, fx(&[]))
        );
    }

    #[test]
    fn test_send_tags_and_tries() {
        let (state, effects) = transition(ReqState::Passive, ReqEvent::SendRequest);
        assert_eq!(state, ReqState::Passive);
        assert_eq!(effects, fx(&[ReqEffect::TagNewRequest, ReqEffect::TrySend]));
    }

    #[test]
    fn test_blocked_send_parks_in_delayed() {
        let (state, _) = transition(ReqState::Passive, ReqEvent::SendBlocked);
        assert_eq!(state, ReqState::Delayed);
        let (state, effects) = transition(state, ReqEvent::PipeAvailable);
        assert_eq!(state, ReqState::Delayed);
        assert_eq!(effects, fx(&[ReqEffect::TrySend]));
        let (state, effects) = transition(state, ReqEvent::SendSucceeded);
        assert_eq!(state, ReqState::Active);
        assert_eq!(effects, fx(&[ReqEffect::StartResendTimer]));
    }

    #[test]
    fn test_reply_stops_timer_before_done() {
        let (state, effects) = transition(ReqState::Active, ReqEvent::ReplyReceived);
        assert_eq!(state, ReqState::StoppingTimer);
        assert_eq!(effects, fx(&[ReqEffect::StopResendTimer]));
        let (state, effects) = transition(state, ReqEvent::TimerStopConfirmed);
        assert_eq!(state, ReqState::Done);
        assert_eq!(effects, fx(&[ReqEffect::ReplyReady]));
        let (state, _) = transition(state, ReqEvent::ReplyRetrieved);
        assert_eq!(state, ReqState::Passive);
    }

    #[test]
    fn test_timeout_resends_same_request() {
        let (state, effects) = transition(ReqState::Active, ReqEvent::Timeout);
        assert_eq!(state, ReqState::TimedOut);
        assert_eq!(effects, fx(&[ReqEffect::StopResendTimer]));
        // No TagNewRequest on the resend path: the id survives.
        let (state, effects) = transition(state, ReqEvent::TimerStopConfirmed);
        assert_eq!(state, ReqState::Passive);
        assert_eq!(effects, fx(&[ReqEffect::TrySend]));
    }

    #[test]
    fn test_pipe_loss_behaves_like_timeout() {
        assert_eq!(
            transition(ReqState::Active, ReqEvent::ActivePipeRemoved),
            transition(ReqState::Active, ReqEvent::Timeout)
        );
    }

    #[test]
    fn test_cancel_gets_new_id() {
        let (state, effects) = transition(ReqState::Active, ReqEvent::SendRequest);
        assert_eq!(state, ReqState::Cancelling);
        assert_eq!(effects, fx(&[ReqEffect::StopResendTimer]));
        let (state, effects) = transition(state, ReqEvent::TimerStopConfirmed);
        assert_eq!(state, ReqState::Passive);
        assert_eq!(effects, fx(&[ReqEffect::TagNewRequest, ReqEffect::TrySend]));
    }

    #[test]
    fn test_send_over_stored_reply_discards_it() {
        let (state, effects) = transition(ReqState::Done, ReqEvent::SendRequest);
        assert_eq!(state, ReqState::Cancelling);
        assert_eq!(
            effects,
            fx(&[ReqEffect::DiscardStoredReply, ReqEffect::StopResendTimer])
        );
    }

    #[test]
    fn test_stale_events_ignored() {
        for state in [
            ReqState::Passive,
            ReqState::Delayed,
            ReqState::Cancelling,
            ReqState::Done,
        ] {
            let (next, effects) = transition(state, ReqEvent::Timeout);
            assert_eq!(next, state);
            assert!(effects.is_empty());
            let (next, effects) = transition(state, ReqEvent::ReplyReceived);
            assert_eq!(next, state);
            assert!(effects.is_empty());
        }
    }

    #[test]
    fn test_tag_marker_set() {
        let req = ReqProto::with_seed(7);
        assert_eq!(req.current_tag() & TAG_MARKER, TAG_MARKER);
        assert_eq!(req.current_tag() & !TAG_MARKER, 7);
    }
}
