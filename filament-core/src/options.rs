//! Generic socket options.
//!
//! Options at the baseline level apply to every socket regardless of
//! protocol or transport: timeouts, buffer sizes, priorities, reconnect
//! policy. Protocol- and transport-specific options are dispatched
//! elsewhere; this module only knows the generic set.
//!
//! Two surfaces are provided: a typed builder (`with_*`) for Rust callers,
//! and an integer get/set pair ([`SocketOptions::set`] /
//! [`SocketOptions::get`]) backing the BSD-style option API, where
//! durations are milliseconds and `-1` means "infinite".

use std::time::Duration;

use crate::error::{Result, SpError};

/// Lowest priority value accepted for send/receive priorities.
pub const PRIORITY_MIN: i64 = 1;
/// Highest priority value accepted for send/receive priorities.
pub const PRIORITY_MAX: i64 = 16;

/// Baseline socket options, one instance per socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    /// Time to wait for pending outbound messages on close.
    pub linger: Option<Duration>,

    /// Send-side buffering, in bytes. Sizes the per-pipe outbound queue.
    pub send_buffer: usize,

    /// Receive-side buffering, in bytes. Sizes the per-pipe inbound queue.
    pub recv_buffer: usize,

    /// Maximum time a blocking `send` may wait. `None` blocks indefinitely;
    /// `Some(Duration::ZERO)` is non-blocking.
    pub send_timeout: Option<Duration>,

    /// Maximum time a blocking `recv` may wait. Same semantics as
    /// `send_timeout`.
    pub recv_timeout: Option<Duration>,

    /// Initial delay before a connecting endpoint retries.
    pub reconnect_ivl: Duration,

    /// Cap for exponential reconnect backoff. Zero disables backoff and the
    /// base interval is used for every attempt.
    pub reconnect_ivl_max: Duration,

    /// Outbound priority assigned to new pipes, 1 (highest) to 16.
    pub send_priority: u8,

    /// Inbound priority assigned to new pipes, 1 (highest) to 16.
    pub recv_priority: u8,

    /// Restrict TCP-like transports to IPv4.
    pub ipv4_only: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            linger: Some(Duration::from_secs(1)),
            send_buffer: 128 * 1024,
            recv_buffer: 128 * 1024,
            send_timeout: None, // Block indefinitely
            recv_timeout: None, // Block indefinitely
            reconnect_ivl: Duration::from_millis(100),
            reconnect_ivl_max: Duration::ZERO, // No backoff
            send_priority: 8,
            recv_priority: 8,
            ipv4_only: true,
        }
    }
}

/// Identifier for one generic option, used by the integer get/set surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericOption {
    Linger,
    SendBuffer,
    RecvBuffer,
    SendTimeout,
    RecvTimeout,
    ReconnectIvl,
    ReconnectIvlMax,
    SendPriority,
    RecvPriority,
    Ipv4Only,
}

impl SocketOptions {
    /// Create new socket options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set receive timeout.
    #[must_use]
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = Some(timeout);
        self
    }

    /// Set send timeout.
    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Set linger timeout.
    #[must_use]
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    /// Set reconnection interval.
    #[must_use]
    pub fn with_reconnect_ivl(mut self, ivl: Duration) -> Self {
        self.reconnect_ivl = ivl;
        self
    }

    /// Set maximum reconnection interval for exponential backoff.
    #[must_use]
    pub fn with_reconnect_ivl_max(mut self, max: Duration) -> Self {
        self.reconnect_ivl_max = max;
        self
    }

    /// Check if receive operations should be non-blocking.
    #[must_use]
    pub fn is_recv_nonblocking(&self) -> bool {
        matches!(self.recv_timeout, Some(d) if d.is_zero())
    }

    /// Check if send operations should be non-blocking.
    #[must_use]
    pub fn is_send_nonblocking(&self) -> bool {
        matches!(self.send_timeout, Some(d) if d.is_zero())
    }

    /// Reconnection interval for the given attempt, with exponential
    /// backoff capped at `reconnect_ivl_max`.
    #[must_use]
    pub fn next_reconnect_ivl(&self, attempt: u32) -> Duration {
        if self.reconnect_ivl_max.is_zero() {
            return self.reconnect_ivl;
        }
        let backoff = self
            .reconnect_ivl
            .saturating_mul(2u32.saturating_pow(attempt));
        backoff.min(self.reconnect_ivl_max)
    }

    /// Set one generic option from its integer encoding.
    ///
    /// Durations are milliseconds with `-1` meaning infinite; booleans are
    /// `0` or `1`; everything else is rejected with
    /// [`SpError::InvalidArgument`].
    pub fn set(&mut self, opt: GenericOption, value: i64) -> Result<()> {
        match opt {
            GenericOption::Linger => self.linger = ms_opt(value)?,
            GenericOption::SendBuffer => self.send_buffer = positive(value)?,
            GenericOption::RecvBuffer => self.recv_buffer = positive(value)?,
            GenericOption::SendTimeout => self.send_timeout = ms_opt(value)?,
            GenericOption::RecvTimeout => self.recv_timeout = ms_opt(value)?,
            GenericOption::ReconnectIvl => self.reconnect_ivl = ms(value)?,
            GenericOption::ReconnectIvlMax => self.reconnect_ivl_max = ms(value)?,
            GenericOption::SendPriority => self.send_priority = priority(value)?,
            GenericOption::RecvPriority => self.recv_priority = priority(value)?,
            GenericOption::Ipv4Only => self.ipv4_only = boolean(value)?,
        }
        Ok(())
    }

    /// Read one generic option in its integer encoding.
    #[must_use]
    pub fn get(&self, opt: GenericOption) -> i64 {
        match opt {
            GenericOption::Linger => encode_ms_opt(self.linger),
            GenericOption::SendBuffer => self.send_buffer as i64,
            GenericOption::RecvBuffer => self.recv_buffer as i64,
            GenericOption::SendTimeout => encode_ms_opt(self.send_timeout),
            GenericOption::RecvTimeout => encode_ms_opt(self.recv_timeout),
            GenericOption::ReconnectIvl => self.reconnect_ivl.as_millis() as i64,
            GenericOption::ReconnectIvlMax => self.reconnect_ivl_max.as_millis() as i64,
            GenericOption::SendPriority => i64::from(self.send_priority),
            GenericOption::RecvPriority => i64::from(self.recv_priority),
            GenericOption::Ipv4Only => i64::from(self.ipv4_only),
        }
    }
}

fn ms(value: i64) -> Result<Duration> {
    if value < 0 {
        return Err(SpError::InvalidArgument);
    }
    Ok(Duration::from_millis(value as u64))
}

fn ms_opt(value: i64) -> Result<Option<Duration>> {
    match value {
        -1 => Ok(None),
        v if v >= 0 => Ok(Some(Duration::from_millis(v as u64))),
        _ => Err(SpError::InvalidArgument),
    }
}

fn encode_ms_opt(value: Option<Duration>) -> i64 {
    value.map_or(-1, |d| d.as_millis() as i64)
}

fn positive(value: i64) -> Result<usize> {
    if value <= 0 {
        return Err(SpError::InvalidArgument);
    }
    Ok(value as usize)
}

fn priority(value: i64) -> Result<u8> {
    if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&value) {
        return Err(SpError::InvalidArgument);
    }
    Ok(value as u8)
}

fn boolean(value: i64) -> Result<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(SpError::InvalidArgument),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = SocketOptions::default();
        assert!(opts.recv_timeout.is_none());
        assert!(opts.send_timeout.is_none());
        assert_eq!(opts.reconnect_ivl, Duration::from_millis(100));
        assert_eq!(opts.send_priority, 8);
        assert!(opts.ipv4_only);
    }

    #[test]
    fn test_builder_pattern() {
        let opts = SocketOptions::new()
            .with_recv_timeout(Duration::from_secs(5))
            .with_send_timeout(Duration::from_secs(10));
        assert_eq!(opts.recv_timeout, Some(Duration::from_secs(5)));
        assert_eq!(opts.send_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_nonblocking_checks() {
        let blocking = SocketOptions::new();
        assert!(!blocking.is_recv_nonblocking());

        let nonblocking = SocketOptions::new().with_recv_timeout(Duration::ZERO);
        assert!(nonblocking.is_recv_nonblocking());
    }

    #[test]
    fn test_priority_validation() {
        let mut opts = SocketOptions::new();
        assert!(opts.set(GenericOption::SendPriority, 1).is_ok());
        assert!(opts.set(GenericOption::SendPriority, 16).is_ok());
        assert_eq!(
            opts.set(GenericOption::SendPriority, 0).unwrap_err(),
            SpError::InvalidArgument
        );
        assert_eq!(
            opts.set(GenericOption::RecvPriority, 17).unwrap_err(),
            SpError::InvalidArgument
        );
    }

    #[test]
    fn test_buffer_must_be_positive() {
        let mut opts = SocketOptions::new();
        assert!(opts.set(GenericOption::SendBuffer, 4096).is_ok());
        assert_eq!(opts.send_buffer, 4096);
        assert!(opts.set(GenericOption::SendBuffer, 0).is_err());
        assert!(opts.set(GenericOption::RecvBuffer, -4).is_err());
    }

    #[test]
    fn test_boolean_only_field() {
        let mut opts = SocketOptions::new();
        assert!(opts.set(GenericOption::Ipv4Only, 0).is_ok());
        assert!(!opts.ipv4_only);
        assert!(opts.set(GenericOption::Ipv4Only, 2).is_err());
    }

    #[test]
    fn test_timeout_encoding_round_trip() {
        let mut opts = SocketOptions::new();
        assert_eq!(opts.get(GenericOption::RecvTimeout), -1);
        opts.set(GenericOption::RecvTimeout, 250).unwrap();
        assert_eq!(opts.recv_timeout, Some(Duration::from_millis(250)));
        assert_eq!(opts.get(GenericOption::RecvTimeout), 250);
    }

    #[test]
    fn test_exponential_backoff() {
        let opts = SocketOptions::new()
            .with_reconnect_ivl(Duration::from_millis(100))
            .with_reconnect_ivl_max(Duration::from_secs(10));

        assert_eq!(opts.next_reconnect_ivl(0), Duration::from_millis(100));
        assert_eq!(opts.next_reconnect_ivl(1), Duration::from_millis(200));
        assert_eq!(opts.next_reconnect_ivl(2), Duration::from_millis(400));
        assert_eq!(opts.next_reconnect_ivl(10), Duration::from_secs(10));
    }

    #[test]
    fn test_no_backoff_without_cap() {
        let opts = SocketOptions::new().with_reconnect_ivl(Duration::from_millis(100));
        assert_eq!(opts.next_reconnect_ivl(0), Duration::from_millis(100));
        assert_eq!(opts.next_reconnect_ivl(10), Duration::from_millis(100));
    }
}
