//! Filament SP
//!
//! Scalability-protocols layer: the socket core, the request/reply
//! protocol family (cooked and raw), the transport seam and the
//! in-process transport, all stitched together by the [`Context`].
//!
//! # Examples
//!
//! ```
//! use filament_sp::context::Context;
//! use filament_sp::protocol::{Domain, REP, REQ};
//! use filament_core::message::Msg;
//!
//! let ctx = Context::new();
//! let rep = ctx.socket(Domain::Sp, REP).unwrap();
//! let req = ctx.socket(Domain::Sp, REQ).unwrap();
//! ctx.bind(rep, "inproc://example").unwrap();
//! ctx.connect(req, "inproc://example").unwrap();
//!
//! ctx.send(req, Msg::from_chunk(b"ping"), false).unwrap();
//! let question = ctx.recv(rep, false).unwrap();
//! ctx.send(rep, question, false).unwrap();
//! let answer = ctx.recv(req, false).unwrap();
//! assert_eq!(answer.body(), b"ping");
//!
//! ctx.close(req).unwrap();
//! ctx.close(rep).unwrap();
//! ```

#![cfg_attr(not(test), deny(unsafe_code))]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]

pub mod context;
pub mod endpoint;
pub mod inproc;
pub mod pipe;
pub mod protocol;
pub mod rep;
pub mod req;
pub mod sock;
pub mod transport;
pub mod xrep;
pub mod xreq;

pub use context::{Context, SocketHandle, MAX_SOCKETS};
pub use protocol::{Domain, ProtoOption, REP, REQ};
