//! Transport contract.
//!
//! A transport turns `scheme://rest` addresses into live pipes. The
//! socket layer never sees bytes or connections, only [`Session`] objects
//! it can ask to stop and pipes the session attaches via the owning
//! socket. Byte-level transports (TCP, IPC) plug in behind this seam; the
//! in-process transport in [`crate::inproc`] is the one that ships.

use std::sync::Weak;

use filament_core::error::Result;
use filament_core::options::SocketOptions;

use crate::sock::SocketCore;

/// Outcome of asking a session to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopResult {
    /// The session is fully stopped; no further callbacks will arrive.
    Stopped,
    /// The session stops asynchronously and will confirm through
    /// [`SocketCore::endpoint_stopped`].
    Pending,
}

/// A live bound or connected attachment produced by a transport.
///
/// `request_stop` must not block: it is called while the owning socket's
/// execution context is held.
pub trait Session: Send {
    /// Begin shutdown. Returns whether the stop completed synchronously.
    fn request_stop(&mut self) -> StopResult;
}

/// Everything a transport needs to service one endpoint.
pub struct TransportCtx {
    /// The owning socket. Sessions hold it weakly so a socket being
    /// deallocated never waits on its own workers' references.
    pub sock: Weak<SocketCore>,
    /// Endpoint id within the owning socket.
    pub endpoint_id: u32,
    /// Snapshot of the socket's options at endpoint creation.
    pub options: SocketOptions,
}

/// Transport-specific option storage, created lazily per socket per
/// transport. Transports with no options return `None` from
/// [`Transport::option_set`].
pub trait OptionSet: Send {
    /// Set one transport option by raw id.
    fn set(&mut self, option: u32, value: i64) -> Result<()>;
    /// Read one transport option by raw id.
    fn get(&self, option: u32) -> Result<i64>;
}

/// A registered transport.
pub trait Transport: Send + Sync {
    /// Scheme this transport owns, matched case-sensitively.
    fn scheme(&self) -> &'static str;

    /// Bind to the local address `rest` (the part after `scheme://`).
    fn bind(&self, rest: &str, ctx: TransportCtx) -> Result<Box<dyn Session>>;

    /// Connect to the remote address `rest`.
    fn connect(&self, rest: &str, ctx: TransportCtx) -> Result<Box<dyn Session>>;

    /// Per-socket option storage for this transport, if it has options.
    fn option_set(&self) -> Option<Box<dyn OptionSet>> {
        None
    }
}
