//! In-process transport.
//!
//! Bound names live in a registry shared by all sockets of one context;
//! `inproc://name` never crosses the process boundary. Each connecting
//! endpoint runs a small worker thread that joins the two sockets with a
//! fresh pipe pair, watches for either side going away and reconnects
//! with the socket's backoff policy, exactly as a networked transport
//! would after a broken connection.
//!
//! Connect-before-bind works: an unbound name is retried on the
//! reconnect interval until a binder shows up.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use filament_core::error::{Result, SpError};
use tracing::{debug, trace};

use crate::pipe::pipe_pair;
use crate::sock::SocketCore;
use crate::transport::{Session, StopResult, Transport, TransportCtx};

/// The scheme this transport registers under.
pub const SCHEME: &str = "inproc";

struct BoundEntry {
    sock: Weak<SocketCore>,
}

type Registry = Arc<DashMap<String, BoundEntry>>;

/// In-process transport; one instance per context.
pub struct InprocTransport {
    registry: Registry,
}

impl InprocTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InprocTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for InprocTransport {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    fn bind(&self, rest: &str, ctx: TransportCtx) -> Result<Box<dyn Session>> {
        if rest.is_empty() {
            return Err(SpError::InvalidArgument);
        }
        let entry = self.registry.entry(rest.to_string());
        match entry {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                // A dead binder's leftover entry may be reclaimed.
                if occupied.get().sock.strong_count() > 0 {
                    return Err(SpError::AddressInUse);
                }
                occupied.insert(BoundEntry {
                    sock: ctx.sock.clone(),
                });
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(BoundEntry {
                    sock: ctx.sock.clone(),
                });
            }
        }
        debug!("[INPROC] bound {}", rest);
        Ok(Box::new(BindSession {
            registry: Arc::clone(&self.registry),
            name: rest.to_string(),
            sock: ctx.sock,
            removed: false,
        }))
    }

    fn connect(&self, rest: &str, ctx: TransportCtx) -> Result<Box<dyn Session>> {
        if rest.is_empty() {
            return Err(SpError::InvalidArgument);
        }
        let (stop_tx, stop_rx) = flume::bounded::<()>(0);
        let registry = Arc::clone(&self.registry);
        let name = rest.to_string();
        std::thread::Builder::new()
            .name(format!("filament-inproc-{rest}"))
            .spawn(move || connect_worker(&registry, &name, &ctx, &stop_rx))
            .map_err(|_| SpError::TooManyOpenFiles)?;
        Ok(Box::new(ConnectSession {
            stop_tx: Some(stop_tx),
        }))
    }
}

/// Holds a name in the registry for as long as the endpoint lives.
struct BindSession {
    registry: Registry,
    name: String,
    sock: Weak<SocketCore>,
    removed: bool,
}

impl BindSession {
    fn unregister(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        // Only remove our own registration; the name may have been
        // reclaimed by a newer binder.
        self.registry
            .remove_if(&self.name, |_, entry| Weak::ptr_eq(&entry.sock, &self.sock));
        debug!("[INPROC] unbound {}", self.name);
    }
}

impl Session for BindSession {
    fn request_stop(&mut self) -> StopResult {
        self.unregister();
        StopResult::Stopped
    }
}

impl Drop for BindSession {
    fn drop(&mut self) {
        self.unregister();
    }
}

/// Owns the connect worker's stop channel; dropping the sender tells
/// the worker to wind down.
struct ConnectSession {
    stop_tx: Option<flume::Sender<()>>,
}

impl Session for ConnectSession {
    fn request_stop(&mut self) -> StopResult {
        self.stop_tx = None;
        StopResult::Pending
    }
}

enum Wake {
    Stop,
    PeerGone,
}

fn connect_worker(
    registry: &Registry,
    name: &str,
    ctx: &TransportCtx,
    stop_rx: &flume::Receiver<()>,
) {
    let mut attempt: u32 = 0;
    loop {
        let Some(local) = ctx.sock.upgrade() else {
            break;
        };
        let binder = registry
            .get(name)
            .and_then(|entry| entry.sock.upgrade());
        let Some(remote) = binder else {
            drop(local);
            let delay = ctx.options.next_reconnect_ivl(attempt);
            attempt = attempt.saturating_add(1);
            match stop_rx.recv_timeout(delay) {
                Err(flume::RecvTimeoutError::Timeout) => continue,
                _ => break,
            }
        };

        let (local_half, remote_half, monitor) = pipe_pair(local.pipe_side_cfg(), remote.pipe_side_cfg());
        let pipe = local_half.id();
        if !remote.add_pipe(remote_half, true) {
            // Binder is shutting down; its registration will disappear.
            drop(local_half);
            drop(remote);
            drop(local);
            let delay = ctx.options.next_reconnect_ivl(attempt);
            attempt = attempt.saturating_add(1);
            match stop_rx.recv_timeout(delay) {
                Err(flume::RecvTimeoutError::Timeout) => continue,
                _ => break,
            }
        }
        if !local.add_pipe(local_half, false) {
            break;
        }
        trace!("[INPROC] {} connected via {}", name, pipe);
        attempt = 0;
        drop(remote);
        drop(local);

        let wake = flume::Selector::new()
            .recv(stop_rx, |_| Wake::Stop)
            .recv(&monitor.b_closed, |_| Wake::PeerGone)
            .wait();
        match wake {
            Wake::Stop => {
                if let Some(local) = ctx.sock.upgrade() {
                    local.remove_pipe(pipe, false);
                }
                break;
            }
            Wake::PeerGone => {
                debug!("[INPROC] {} peer gone, reconnecting", name);
                if let Some(local) = ctx.sock.upgrade() {
                    local.remove_pipe(pipe, true);
                }
            }
        }
    }
    if let Some(local) = ctx.sock.upgrade() {
        local.endpoint_stopped(ctx.endpoint_id);
    }
}
