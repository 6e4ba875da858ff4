//! Shared timer service.
//!
//! One worker thread per context owns a deadline heap and serves every
//! socket's timers (REQ resend, statistics reporting). Commands arrive on
//! a `flume` channel; expiry and stop confirmations are delivered by
//! invoking the caller's sink, which is expected to re-enter the owning
//! socket's execution context and do a bounded amount of work.
//!
//! Stopping a timer is asynchronous: the service always answers with
//! [`TimerEvent::Stopped`], even when the timer already fired, so state
//! machines can treat "timer is being stopped" as an explicit state and
//! wait for the confirmation.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::trace;

/// Identifies one scheduled timer.
pub type TimerToken = u64;

/// Notification delivered to a timer's sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// The deadline elapsed.
    Fired(TimerToken),
    /// A stop request was processed; the timer will not fire any more.
    Stopped(TimerToken),
}

/// Callback invoked by the timer thread. Must be cheap: it runs on the
/// shared worker.
pub type TimerSink = Arc<dyn Fn(TimerEvent) + Send + Sync>;

enum Cmd {
    Schedule {
        token: TimerToken,
        at: Instant,
        sink: TimerSink,
    },
    Stop {
        token: TimerToken,
        sink: TimerSink,
    },
    Shutdown,
}

struct Entry {
    at: Instant,
    token: TimerToken,
    sink: TimerSink,
}

/// Handle for scheduling timers on the shared worker.
#[derive(Clone)]
pub struct TimerHandle {
    tx: flume::Sender<Cmd>,
    next_token: Arc<AtomicU64>,
}

impl TimerHandle {
    /// Schedule a timer `after` from now. The sink receives
    /// [`TimerEvent::Fired`] unless the timer is stopped first.
    pub fn schedule(&self, after: Duration, sink: TimerSink) -> TimerToken {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(Cmd::Schedule {
            token,
            at: Instant::now() + after,
            sink,
        });
        token
    }

    /// Request a stop. The sink always receives [`TimerEvent::Stopped`],
    /// whether or not the timer was still pending.
    pub fn stop(&self, token: TimerToken, sink: TimerSink) {
        let _ = self.tx.send(Cmd::Stop { token, sink });
    }
}

/// Owns the timer worker thread; dropping it shuts the worker down.
pub struct TimerService {
    handle: TimerHandle,
    worker: Option<JoinHandle<()>>,
}

impl TimerService {
    /// Spawn the timer worker.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded::<Cmd>();
        let worker = std::thread::Builder::new()
            .name("filament-timer".to_string())
            .spawn(move || run(&rx))
            .expect("failed to spawn timer thread");
        Self {
            handle: TimerHandle {
                tx,
                next_token: Arc::new(AtomicU64::new(1)),
            },
            worker: Some(worker),
        }
    }

    /// Handle for scheduling timers.
    #[must_use]
    pub fn handle(&self) -> TimerHandle {
        self.handle.clone()
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        let _ = self.handle.tx.send(Cmd::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run(rx: &flume::Receiver<Cmd>) {
    let mut heap: BinaryHeap<Reverse<(Instant, TimerToken)>> = BinaryHeap::new();
    let mut entries: Vec<Entry> = Vec::new();
    let mut stopped: HashSet<TimerToken> = HashSet::new();

    loop {
        let next = heap.peek().map(|Reverse((at, _))| *at);
        let cmd = match next {
            Some(at) => match rx.recv_deadline(at) {
                Ok(cmd) => Some(cmd),
                Err(flume::RecvTimeoutError::Timeout) => None,
                Err(flume::RecvTimeoutError::Disconnected) => return,
            },
            None => match rx.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => return,
            },
        };

        match cmd {
            Some(Cmd::Schedule { token, at, sink }) => {
                trace!(token, "[TIMER] schedule");
                heap.push(Reverse((at, token)));
                entries.push(Entry { at, token, sink });
            }
            Some(Cmd::Stop { token, sink }) => {
                trace!(token, "[TIMER] stop");
                let was_pending = entries.iter().any(|e| e.token == token);
                entries.retain(|e| e.token != token);
                if was_pending {
                    // Tombstone for the heap entry still queued under this
                    // token.
                    stopped.insert(token);
                }
                sink(TimerEvent::Stopped(token));
            }
            Some(Cmd::Shutdown) => return,
            None => {
                // Fire everything that is due.
                let now = Instant::now();
                while let Some(Reverse((at, token))) = heap.peek().copied() {
                    if at > now {
                        break;
                    }
                    heap.pop();
                    if stopped.remove(&token) {
                        continue;
                    }
                    if let Some(pos) = entries.iter().position(|e| e.token == token) {
                        let entry = entries.swap_remove(pos);
                        debug_assert_eq!(entry.at, at);
                        trace!(token, "[TIMER] fired");
                        (entry.sink)(TimerEvent::Fired(token));
                    }
                }
            }
        }
    }
}
