//! Edge-triggered readiness signal.
//!
//! Each socket owns two of these, one per direction. Blocked `send`/`recv`
//! callers park here; protocol code raises the matching edge when the
//! operation may be retried. Closing a signal wakes every waiter with
//! [`SpError::Terminated`] and makes all future waits fail the same way,
//! which is how socket shutdown and context terminate evict blocked
//! application threads.
//!
//! Waits take an absolute deadline, not a timeout: the caller computes the
//! deadline once per blocking operation, so spurious wakes and retries
//! never extend the total wall-clock wait.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, SpError};

#[derive(Debug, Default)]
struct SignalState {
    raised: bool,
    closed: bool,
}

/// Edge-triggered signal with close semantics.
#[derive(Debug, Default)]
pub struct Signal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl Signal {
    /// Create a new, unraised signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the edge, waking one pending or future wait.
    pub fn raise(&self) {
        let mut state = self.state.lock();
        if !state.raised {
            state.raised = true;
            self.cond.notify_all();
        }
    }

    /// Close the signal. Every current and future wait fails with
    /// [`SpError::Terminated`]. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.cond.notify_all();
    }

    /// True once [`Signal::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Wait for the edge, consuming it.
    ///
    /// # Errors
    ///
    /// - [`SpError::Terminated`] when the signal is closed.
    /// - [`SpError::WouldBlock`] when `deadline` elapses first.
    pub fn wait(&self, deadline: Option<Instant>) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(SpError::Terminated);
            }
            if state.raised {
                state.raised = false;
                return Ok(());
            }
            match deadline {
                None => self.cond.wait(&mut state),
                Some(at) => {
                    if self.cond.wait_until(&mut state, at).timed_out() {
                        // The edge may have raced the timeout; prefer it.
                        if state.closed {
                            return Err(SpError::Terminated);
                        }
                        if state.raised {
                            state.raised = false;
                            return Ok(());
                        }
                        return Err(SpError::WouldBlock);
                    }
                }
            }
        }
    }
}

/// Convert a relative timeout into the absolute deadline for one blocking
/// operation. `None` means "no deadline, block indefinitely".
#[must_use]
pub fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|t| Instant::now() + t)
}
