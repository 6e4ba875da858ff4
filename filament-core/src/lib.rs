//! Filament Core
//!
//! This crate contains the runtime-agnostic core building blocks:
//! - Message envelope with move/copy semantics (`message`)
//! - Error taxonomy for the whole socket API (`error`)
//! - `scheme://rest` address parsing (`addr`)
//! - Generic socket options with validation (`options`)
//! - Edge-triggered readiness signal (`signal`)
//! - Per-socket statistics counters (`stats`)
//! - Shared timer worker (`timer`)

#![cfg_attr(not(test), deny(unsafe_code))]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]

pub mod addr;
pub mod error;
pub mod message;
pub mod options;
pub mod signal;
pub mod stats;
pub mod timer;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::addr::{split_scheme, MAX_ADDR_LEN};
    pub use crate::error::{Result, SpError};
    pub use crate::message::Msg;
    pub use crate::options::{GenericOption, SocketOptions};
    pub use crate::signal::{deadline_after, Signal};
    pub use crate::stats::{ReportLabels, SocketStats};
    pub use crate::timer::{TimerEvent, TimerHandle, TimerService, TimerSink, TimerToken};
}
