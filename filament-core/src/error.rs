//! Filament error types.
//!
//! One error kind per user-visible failure condition of the socket API.

use thiserror::Error;

/// Main error type for Filament operations.
///
/// Every public operation returns one of these kinds explicitly; transport
/// internals (accept failures, broken connections) are recovered locally,
/// counted in statistics, and never surface through an unrelated call.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpError {
    /// Malformed option value, null buffer with non-zero length, oversized address
    #[error("invalid argument")]
    InvalidArgument,

    /// Domain is not one of the supported address families
    #[error("address family not supported")]
    AddressFamilyNotSupported,

    /// No registered protocol or transport matches the request
    #[error("protocol not supported")]
    ProtocolNotSupported,

    /// The fixed-size socket table is full
    #[error("too many open sockets")]
    TooManyOpenFiles,

    /// Handle out of range or slot empty
    #[error("bad socket handle")]
    BadFileDescriptor,

    /// Operation attempted on a zombie socket or after global terminate
    #[error("context terminated")]
    Terminated,

    /// Non-blocking operation cannot complete immediately, or a deadline elapsed
    #[error("operation would block")]
    WouldBlock,

    /// Blocking wait was interrupted; the caller must retry the operation
    #[error("operation interrupted")]
    Interrupted,

    /// Operation not valid for this protocol's capability set
    #[error("operation not supported by socket type")]
    NotSupported,

    /// Protocol-level state machine invariant violated (e.g. recv with no request in flight)
    #[error("socket in wrong state for operation")]
    BadState,

    /// Endpoint name already bound (inproc transport)
    #[error("address in use")]
    AddressInUse,
}

/// Result type alias for Filament operations
pub type Result<T> = std::result::Result<T, SpError>;

impl SpError {
    /// Check if the caller is expected to retry the same operation.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Interrupted | Self::WouldBlock)
    }

    /// Check if this error means the socket or context is permanently gone.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Terminated | Self::BadFileDescriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(SpError::Interrupted.is_recoverable());
        assert!(SpError::WouldBlock.is_recoverable());
        assert!(!SpError::Terminated.is_recoverable());
        assert!(!SpError::BadState.is_recoverable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(SpError::Terminated.is_fatal());
        assert!(SpError::BadFileDescriptor.is_fatal());
        assert!(!SpError::WouldBlock.is_fatal());
    }

    #[test]
    fn test_display() {
        assert_eq!(SpError::WouldBlock.to_string(), "operation would block");
        assert_eq!(SpError::Terminated.to_string(), "context terminated");
    }
}
