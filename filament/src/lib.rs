//! # Filament
//!
//! A scalability-protocols messaging library: typed sockets speaking
//! well-defined patterns (request/reply today) over pluggable
//! transports, with reliability built into the pattern itself rather
//! than the transport.
//!
//! ## Architecture
//!
//! - **`filament-core`**: messages, errors, options, signals, timers
//! - **`filament-sp`**: socket core, protocol state machines, transports
//! - **`filament`**: public API surface (this crate)
//!
//! ## Quick Start
//!
//! ```
//! use filament::{Context, Domain, Msg, REP, REQ};
//!
//! let ctx = Context::new();
//! let server = ctx.socket(Domain::Sp, REP).unwrap();
//! let client = ctx.socket(Domain::Sp, REQ).unwrap();
//! ctx.bind(server, "inproc://greeter").unwrap();
//! ctx.connect(client, "inproc://greeter").unwrap();
//!
//! ctx.send(client, Msg::from_chunk(b"hello"), false).unwrap();
//! let request = ctx.recv(server, false).unwrap();
//! ctx.send(server, request, false).unwrap();
//! let reply = ctx.recv(client, false).unwrap();
//! assert_eq!(reply.body(), b"hello");
//!
//! ctx.close(client).unwrap();
//! ctx.close(server).unwrap();
//! ```
//!
//! ## Reliability
//!
//! A REQ socket keeps the request until a matching reply arrives,
//! resending it when the resend interval elapses or the connection that
//! carried it goes away. Stale and duplicate replies are filtered by
//! correlation id. The application only ever sees the happy path.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use filament_core::error::{Result, SpError};
pub use filament_core::message::Msg;
pub use filament_core::options::{GenericOption, SocketOptions};
pub use filament_core::stats::SocketStats;
pub use filament_sp::context::{Context, SocketHandle, MAX_SOCKETS};
pub use filament_sp::protocol::{Domain, ProtoOption, REP, REQ};

// Re-export buffer types used in message bodies
pub use bytes::{Bytes, BytesMut};

pub mod dev_tracing;
