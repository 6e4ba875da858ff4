//! REP: reliable request/reply, responder side.
//!
//! REP alternates strictly between `recv` (take a request) and `send`
//! (answer it). On `recv` the request's header, which carries the
//! requester's correlation tag, is remembered together with the source
//! pipe; `send` re-attaches the header and routes the reply back. A
//! reply whose pipe has meanwhile died is dropped silently: the
//! requester's resend timer covers the loss end to end.

use bytes::BytesMut;
use filament_core::error::{Result, SpError};
use filament_core::message::Msg;
use tracing::debug;

use crate::pipe::{PipeHalf, PipeId};
use crate::protocol::{ProtoCtx, Protocol};
use crate::req::TAG_MARKER;
use crate::xreq::Xreq;

/// Remembered origin of the request being serviced.
struct Backtrace {
    pipe: PipeId,
    header: BytesMut,
}

/// Cooked reply socket.
#[derive(Default)]
pub struct RepProto {
    fq: Xreq,
    backtrace: Option<Backtrace>,
}

impl RepProto {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a request has been received and not yet answered.
    #[must_use]
    pub fn reply_owed(&self) -> bool {
        self.backtrace.is_some()
    }

    fn header_is_valid(header: &[u8]) -> bool {
        // A backtrace is a chain of 4-byte entries whose last entry
        // carries the end marker in its top bit.
        if header.is_empty() || header.len() % 4 != 0 {
            return false;
        }
        let last = &header[header.len() - 4..];
        u32::from_be_bytes([last[0], last[1], last[2], last[3]]) & TAG_MARKER == TAG_MARKER
    }
}

impl Protocol for RepProto {
    /// Answer the pending request.
    ///
    /// [`SpError::BadState`] when no request is pending.
    fn send(&mut self, ctx: &mut ProtoCtx<'_>, mut msg: Msg) -> std::result::Result<(), (Msg, SpError)> {
        let Some(backtrace) = self.backtrace.take() else {
            return Err((msg, SpError::BadState));
        };
        msg.set_header(&backtrace.header);
        let bytes = msg.len();
        match self.fq.send_to(backtrace.pipe, msg) {
            Ok(()) => ctx.stats.count_send(bytes),
            Err((dropped, _)) => {
                debug!("[REP] {} gone, dropping reply", backtrace.pipe);
                drop(dropped);
            }
        }
        Ok(())
    }

    /// Take the next request, remembering where to send the answer.
    ///
    /// [`SpError::BadState`] while a reply is owed.
    fn recv(&mut self, ctx: &mut ProtoCtx<'_>) -> Result<Msg> {
        if self.backtrace.is_some() {
            return Err(SpError::BadState);
        }
        loop {
            let (mut msg, pipe) = self.fq.recv_any()?;
            if !Self::header_is_valid(msg.header()) {
                debug!("[REP] malformed request header from {}, dropping", pipe);
                continue;
            }
            let header = BytesMut::from(msg.header());
            msg.set_header([]);
            self.backtrace = Some(Backtrace { pipe, header });
            ctx.stats.count_recv(msg.len());
            return Ok(msg);
        }
    }

    fn add_pipe(&mut self, ctx: &mut ProtoCtx<'_>, pipe: PipeHalf) {
        self.fq.add_pipe(pipe);
        ctx.send_signal.raise();
    }

    fn remove_pipe(&mut self, _ctx: &mut ProtoCtx<'_>, id: PipeId) {
        self.fq.remove_pipe(id);
        // The pending reply, if its requester just vanished, is detected
        // at send time; the backtrace stays so the strict alternation is
        // preserved.
    }
}
