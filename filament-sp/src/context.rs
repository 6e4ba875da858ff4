//! Context: socket table, type registry, transports, shared services.
//!
//! A [`Context`] replaces the traditional process-global library state.
//! It owns a fixed-size socket table with LIFO slot reuse, the registry
//! of socket types and transports, the shared timer worker and the
//! optional statistics reporter. Dropping the context releases
//! everything; [`Context::terminate`] poisons it first, waking every
//! blocked caller with [`SpError::Terminated`] while keeping slots
//! allocated until the application closes them.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use filament_core::addr::split_scheme;
use filament_core::error::{Result, SpError};
use filament_core::message::Msg;
use filament_core::options::GenericOption;
use filament_core::stats::{ReportLabels, SocketStats};
use filament_core::timer::TimerService;
use tracing::{debug, info};

use crate::inproc::InprocTransport;
use crate::protocol::{Domain, ProtoOption, SocketTypeSpec, REP, REQ};
use crate::rep::RepProto;
use crate::req::ReqProto;
use crate::sock::SocketCore;
use crate::transport::Transport;
use crate::xrep::XrepProto;
use crate::xreq::XreqProto;

/// Capacity of the socket table.
pub const MAX_SOCKETS: usize = 512;

/// Interval between statistics reports when reporting is enabled.
const STATS_IVL: Duration = Duration::from_secs(10);

/// Opaque socket handle; stays valid until [`Context::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle(usize);

impl std::fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sock-{}", self.0)
    }
}

struct Global {
    slots: Vec<Option<Arc<SocketCore>>>,
    /// Stack of free slot indices; LIFO so recently released handles are
    /// reused first.
    free: Vec<usize>,
    zombie: bool,
    socktypes: Vec<SocketTypeSpec>,
    transports: Vec<Arc<dyn Transport>>,
}

/// Library context. See the module docs.
pub struct Context {
    global: Arc<parking_lot::Mutex<Global>>,
    timer: TimerService,
    reporter: Option<(flume::Sender<()>, JoinHandle<()>)>,
}

impl Context {
    /// Create a context with the built-in socket types and the
    /// in-process transport registered.
    ///
    /// Setting `FILAMENT_STATISTICS=1` in the environment enables the
    /// periodic statistics log.
    #[must_use]
    pub fn new() -> Self {
        let global = Arc::new(parking_lot::Mutex::new(Global {
            slots: (0..MAX_SOCKETS).map(|_| None).collect(),
            free: (0..MAX_SOCKETS).rev().collect(),
            zombie: false,
            socktypes: builtin_socket_types(),
            transports: vec![Arc::new(InprocTransport::new())],
        }));

        let reporter = if statistics_enabled() {
            Some(spawn_reporter(Arc::clone(&global)))
        } else {
            None
        };

        Self {
            global,
            timer: TimerService::new(),
            reporter,
        }
    }

    /// Create a socket.
    ///
    /// # Errors
    ///
    /// - [`SpError::Terminated`] after [`Context::terminate`].
    /// - [`SpError::ProtocolNotSupported`] for an unknown type.
    /// - [`SpError::TooManyOpenFiles`] when the table is full.
    pub fn socket(&self, domain: Domain, protocol: u16) -> Result<SocketHandle> {
        let mut global = self.global.lock();
        if global.zombie {
            return Err(SpError::Terminated);
        }
        let spec = global
            .socktypes
            .iter()
            .find(|s| s.domain == domain && s.protocol == protocol)
            .cloned()
            .ok_or(SpError::ProtocolNotSupported)?;
        let Some(slot) = global.free.pop() else {
            return Err(SpError::TooManyOpenFiles);
        };
        let sock = SocketCore::new(&spec, self.timer.handle());
        debug!("[CTX] new {} socket in slot {}", sock.name(), slot);
        global.slots[slot] = Some(sock);
        Ok(SocketHandle(slot))
    }

    /// BSD-style variant of [`Context::socket`] taking the integer
    /// address-family encoding.
    pub fn socket_raw(&self, domain: i32, protocol: u16) -> Result<SocketHandle> {
        self.socket(Domain::from_raw(domain)?, protocol)
    }

    fn sock(&self, handle: SocketHandle) -> Result<Arc<SocketCore>> {
        self.global
            .lock()
            .slots
            .get(handle.0)
            .and_then(Clone::clone)
            .ok_or(SpError::BadFileDescriptor)
    }

    /// Close a socket, blocking until teardown completes. The slot
    /// becomes reusable only afterwards.
    ///
    /// [`SpError::BadFileDescriptor`] when the handle is stale, which
    /// includes a second concurrent close of the same handle.
    pub fn close(&self, handle: SocketHandle) -> Result<()> {
        let sock = {
            let mut global = self.global.lock();
            match global.slots.get_mut(handle.0) {
                Some(slot) => slot.take().ok_or(SpError::BadFileDescriptor)?,
                None => return Err(SpError::BadFileDescriptor),
            }
        };
        let result = sock.close();
        drop(sock);
        self.global.lock().free.push(handle.0);
        result
    }

    /// Bind a local address.
    pub fn bind(&self, handle: SocketHandle, address: &str) -> Result<u32> {
        self.add_endpoint(handle, address, true)
    }

    /// Connect to a remote address.
    pub fn connect(&self, handle: SocketHandle, address: &str) -> Result<u32> {
        self.add_endpoint(handle, address, false)
    }

    fn add_endpoint(&self, handle: SocketHandle, address: &str, bind: bool) -> Result<u32> {
        let sock = self.sock(handle)?;
        let (scheme, rest) = split_scheme(address)?;
        let transport = self.transport(scheme)?;
        sock.add_endpoint(transport.as_ref(), address, rest, bind)
    }

    fn transport(&self, scheme: &str) -> Result<Arc<dyn Transport>> {
        self.global
            .lock()
            .transports
            .iter()
            .find(|t| t.scheme() == scheme)
            .cloned()
            .ok_or(SpError::ProtocolNotSupported)
    }

    /// Remove one endpoint; transport cleanup completes asynchronously.
    pub fn shutdown(&self, handle: SocketHandle, endpoint_id: u32) -> Result<()> {
        self.sock(handle)?.shutdown(endpoint_id)
    }

    /// Send a message. On failure the message is handed back with the
    /// error.
    pub fn send(
        &self,
        handle: SocketHandle,
        msg: Msg,
        dont_wait: bool,
    ) -> std::result::Result<(), (Msg, SpError)> {
        let sock = match self.sock(handle) {
            Ok(sock) => sock,
            Err(e) => return Err((msg, e)),
        };
        sock.send(msg, dont_wait)
    }

    /// Receive a message.
    pub fn recv(&self, handle: SocketHandle, dont_wait: bool) -> Result<Msg> {
        self.sock(handle)?.recv(dont_wait)
    }

    /// Set a generic socket option.
    pub fn set_option(&self, handle: SocketHandle, opt: GenericOption, value: i64) -> Result<()> {
        self.sock(handle)?.set_option(opt, value)
    }

    /// Read a generic socket option.
    pub fn get_option(&self, handle: SocketHandle, opt: GenericOption) -> Result<i64> {
        self.sock(handle)?.get_option(opt)
    }

    /// Set a protocol-level option.
    pub fn set_proto_option(
        &self,
        handle: SocketHandle,
        opt: ProtoOption,
        value: i64,
    ) -> Result<()> {
        self.sock(handle)?.set_proto_option(opt, value)
    }

    /// Read a protocol-level option.
    pub fn get_proto_option(&self, handle: SocketHandle, opt: ProtoOption) -> Result<i64> {
        self.sock(handle)?.get_proto_option(opt)
    }

    /// Set a transport-level option for the named scheme.
    pub fn set_transport_option(
        &self,
        handle: SocketHandle,
        scheme: &str,
        option: u32,
        value: i64,
    ) -> Result<()> {
        let sock = self.sock(handle)?;
        let transport = self.transport(scheme)?;
        sock.set_transport_option(transport.as_ref(), option, value)
    }

    /// Read a transport-level option for the named scheme.
    pub fn get_transport_option(
        &self,
        handle: SocketHandle,
        scheme: &str,
        option: u32,
    ) -> Result<i64> {
        let sock = self.sock(handle)?;
        let transport = self.transport(scheme)?;
        sock.get_transport_option(transport.as_ref(), option)
    }

    /// Point-in-time statistics for one socket.
    pub fn stats(&self, handle: SocketHandle) -> Result<SocketStats> {
        Ok(self.sock(handle)?.stats())
    }

    /// Poison the context: every open socket is zombified and every
    /// blocked operation fails with [`SpError::Terminated`]. Handles
    /// stay valid so the application can still close them. Idempotent;
    /// there is no way back.
    pub fn terminate(&self) {
        let mut global = self.global.lock();
        if global.zombie {
            return;
        }
        global.zombie = true;
        info!("[CTX] terminating");
        for slot in global.slots.iter().flatten() {
            slot.zombify();
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Some((stop_tx, worker)) = self.reporter.take() {
            drop(stop_tx);
            let _ = worker.join();
        }
    }
}

fn builtin_socket_types() -> Vec<SocketTypeSpec> {
    vec![
        SocketTypeSpec {
            domain: Domain::Sp,
            protocol: REQ,
            name: "REQ",
            can_send: true,
            can_recv: true,
            ctor: || Box::new(ReqProto::new()),
        },
        SocketTypeSpec {
            domain: Domain::Sp,
            protocol: REP,
            name: "REP",
            can_send: true,
            can_recv: true,
            ctor: || Box::new(RepProto::new()),
        },
        SocketTypeSpec {
            domain: Domain::SpRaw,
            protocol: REQ,
            name: "XREQ",
            can_send: true,
            can_recv: true,
            ctor: || Box::new(XreqProto::new()),
        },
        SocketTypeSpec {
            domain: Domain::SpRaw,
            protocol: REP,
            name: "XREP",
            can_send: true,
            can_recv: true,
            ctor: || Box::new(XrepProto::new()),
        },
    ]
}

fn statistics_enabled() -> bool {
    matches!(
        std::env::var("FILAMENT_STATISTICS").as_deref(),
        Ok("1" | "true" | "yes")
    )
}

fn spawn_reporter(global: Arc<parking_lot::Mutex<Global>>) -> (flume::Sender<()>, JoinHandle<()>) {
    let labels = ReportLabels::from_env();
    let (stop_tx, stop_rx) = flume::bounded::<()>(0);
    let worker = std::thread::Builder::new()
        .name("filament-stats".to_string())
        .spawn(move || loop {
            match stop_rx.recv_timeout(STATS_IVL) {
                Err(flume::RecvTimeoutError::Timeout) => {}
                _ => return,
            }
            let socks: Vec<Arc<SocketCore>> =
                global.lock().slots.iter().flatten().cloned().collect();
            for sock in socks {
                let stats = sock.stats();
                info!(
                    target: "filament::stats",
                    host = %labels.hostname,
                    app = %labels.appname,
                    socket = sock.name(),
                    sent = stats.messages_sent,
                    received = stats.messages_received,
                    connections = stats.current_connections,
                    "statistics"
                );
            }
        })
        .expect("failed to spawn statistics thread");
    (stop_tx, worker)
}
