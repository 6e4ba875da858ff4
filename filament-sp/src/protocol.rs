//! Protocol contract and socket-type registry entries.
//!
//! A [`Protocol`] is the per-socket state machine behind `send`/`recv`.
//! All of its methods run inside the owning socket's execution context;
//! none of them may block. Blocking semantics live one layer up, in
//! [`crate::sock`], which loops over the non-blocking primitives here and
//! parks on the socket's readiness signals.

use std::time::Duration;

use filament_core::error::{Result, SpError};
use filament_core::message::Msg;
use filament_core::signal::Signal;
use filament_core::stats::SocketStats;
use filament_core::timer::{TimerEvent, TimerHandle, TimerSink, TimerToken};

use crate::pipe::{PipeHalf, PipeId};

/// Address families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    /// Standard scalability-protocols sockets.
    Sp,
    /// Raw sockets: the application manages protocol headers itself.
    SpRaw,
}

impl Domain {
    /// Decode the integer encoding used by the BSD-style surface.
    ///
    /// # Errors
    ///
    /// [`SpError::AddressFamilyNotSupported`] for anything but the two
    /// known families.
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            1 => Ok(Self::Sp),
            2 => Ok(Self::SpRaw),
            _ => Err(SpError::AddressFamilyNotSupported),
        }
    }
}

/// Request/reply protocol family id.
pub const PROTO_REQREP: u16 = 3;
/// REQ socket protocol id.
pub const REQ: u16 = PROTO_REQREP * 16;
/// REP socket protocol id.
pub const REP: u16 = PROTO_REQREP * 16 + 1;

/// Protocol-level options, dispatched through the protocol vtable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoOption {
    /// REQ resend interval in milliseconds.
    ReqResendIvl,
}

/// Services available to a protocol while it holds the socket's
/// execution context.
pub struct ProtoCtx<'a> {
    /// Raised when a blocked `send` may be retried.
    pub send_signal: &'a Signal,
    /// Raised when a blocked `recv` may be retried.
    pub recv_signal: &'a Signal,
    /// Socket statistics block.
    pub stats: &'a mut SocketStats,
    timer: &'a TimerHandle,
    timer_sink: &'a TimerSink,
}

impl<'a> ProtoCtx<'a> {
    pub(crate) fn new(
        send_signal: &'a Signal,
        recv_signal: &'a Signal,
        stats: &'a mut SocketStats,
        timer: &'a TimerHandle,
        timer_sink: &'a TimerSink,
    ) -> Self {
        Self {
            send_signal,
            recv_signal,
            stats,
            timer,
            timer_sink,
        }
    }

    /// Schedule a timer; it reports back through the socket's timer sink.
    pub fn schedule_timer(&self, after: Duration) -> TimerToken {
        self.timer.schedule(after, self.timer_sink.clone())
    }

    /// Ask for a timer stop; confirmation arrives as
    /// [`TimerEvent::Stopped`] through [`Protocol::on_timer`].
    pub fn stop_timer(&self, token: TimerToken) {
        self.timer.stop(token, self.timer_sink.clone());
    }
}

/// Per-socket protocol state machine.
pub trait Protocol: Send {
    /// Non-blocking send primitive. On failure the message is handed
    /// back with the error so the socket layer can retry it.
    fn send(&mut self, ctx: &mut ProtoCtx<'_>, msg: Msg) -> std::result::Result<(), (Msg, SpError)>;

    /// Non-blocking receive primitive.
    fn recv(&mut self, ctx: &mut ProtoCtx<'_>) -> Result<Msg>;

    /// A new pipe became available to this socket.
    fn add_pipe(&mut self, ctx: &mut ProtoCtx<'_>, pipe: PipeHalf);

    /// A pipe went away.
    fn remove_pipe(&mut self, ctx: &mut ProtoCtx<'_>, id: PipeId);

    /// Timer expiry or stop confirmation for a timer this protocol owns.
    fn on_timer(&mut self, ctx: &mut ProtoCtx<'_>, event: TimerEvent) {
        let _ = (ctx, event);
    }

    /// Set a protocol-level option.
    fn set_option(&mut self, opt: ProtoOption, value: i64) -> Result<()> {
        let _ = (opt, value);
        Err(SpError::NotSupported)
    }

    /// Read a protocol-level option.
    fn get_option(&self, opt: ProtoOption) -> Result<i64> {
        let _ = opt;
        Err(SpError::NotSupported)
    }

    /// Begin protocol shutdown. Returns `true` when fully stopped;
    /// otherwise the socket polls [`Protocol::stopped`] after each
    /// subsequent event.
    fn stop(&mut self, ctx: &mut ProtoCtx<'_>) -> bool {
        let _ = ctx;
        true
    }

    /// Whether an asynchronous stop has completed.
    fn stopped(&self) -> bool {
        true
    }
}

/// Registry entry describing one socket type.
#[derive(Clone)]
pub struct SocketTypeSpec {
    /// Address family the type lives in.
    pub domain: Domain,
    /// Protocol id within the family.
    pub protocol: u16,
    /// Human-readable name for logs.
    pub name: &'static str,
    /// Whether `send` is meaningful for this type.
    pub can_send: bool,
    /// Whether `recv` is meaningful for this type.
    pub can_recv: bool,
    /// Constructor for the per-socket state machine.
    pub ctor: fn() -> Box<dyn Protocol>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_decoding() {
        assert_eq!(Domain::from_raw(1).unwrap(), Domain::Sp);
        assert_eq!(Domain::from_raw(2).unwrap(), Domain::SpRaw);
        assert_eq!(
            Domain::from_raw(3).unwrap_err(),
            SpError::AddressFamilyNotSupported
        );
    }

    #[test]
    fn test_protocol_ids() {
        assert_eq!(REQ, 48);
        assert_eq!(REP, 49);
    }
}
