//! Raw reply-side routing.
//!
//! The raw REP socket fair-queues inbound requests and routes outbound
//! replies back to the pipe the request arrived on. Routing state travels
//! in the message header: `recv` prefixes the header with the source
//! pipe's 8-byte key, `send` pops the key and addresses the pipe it
//! names. A device can therefore shuttle messages between raw sockets
//! without understanding them.

use bytes::{BufMut, BytesMut};
use filament_core::error::{Result, SpError};
use filament_core::message::Msg;
use tracing::debug;

use crate::pipe::{PipeHalf, PipeId};
use crate::protocol::{ProtoCtx, Protocol};
use crate::xreq::Xreq;

/// Length of the pipe key prefixed to raw reply headers.
pub const PIPE_KEY_LEN: usize = 8;

/// Raw reply socket.
#[derive(Default)]
pub struct XrepProto {
    fq: Xreq,
}

impl XrepProto {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Protocol for XrepProto {
    /// Pop the pipe key off the header and route the reply. A reply the
    /// named pipe cannot take is dropped: the requester's resend covers
    /// the loss.
    fn send(&mut self, ctx: &mut ProtoCtx<'_>, mut msg: Msg) -> std::result::Result<(), (Msg, SpError)> {
        if msg.header().len() < PIPE_KEY_LEN {
            return Err((msg, SpError::InvalidArgument));
        }
        let mut key = [0u8; PIPE_KEY_LEN];
        key.copy_from_slice(&msg.header()[..PIPE_KEY_LEN]);
        let pipe = PipeId::from_raw(u64::from_be_bytes(key));
        let rest = BytesMut::from(&msg.header()[PIPE_KEY_LEN..]);
        *msg.header_mut() = rest;

        let bytes = msg.len();
        match self.fq.send_to(pipe, msg) {
            Ok(()) => {
                ctx.stats.count_send(bytes);
                Ok(())
            }
            Err((dropped, _)) => {
                debug!("[XREP] {} gone or full, dropping reply", pipe);
                drop(dropped);
                Ok(())
            }
        }
    }

    /// Fair-queue one request and prefix its header with the source pipe
    /// key.
    fn recv(&mut self, ctx: &mut ProtoCtx<'_>) -> Result<Msg> {
        let (mut msg, pipe) = self.fq.recv_any()?;
        let mut header = BytesMut::with_capacity(PIPE_KEY_LEN + msg.header().len());
        header.put_slice(&pipe.to_raw().to_be_bytes());
        header.put_slice(msg.header());
        *msg.header_mut() = header;
        ctx.stats.count_recv(msg.len());
        Ok(msg)
    }

    fn add_pipe(&mut self, ctx: &mut ProtoCtx<'_>, pipe: PipeHalf) {
        self.fq.add_pipe(pipe);
        ctx.send_signal.raise();
    }

    fn remove_pipe(&mut self, _ctx: &mut ProtoCtx<'_>, id: PipeId) {
        self.fq.remove_pipe(id);
    }
}
