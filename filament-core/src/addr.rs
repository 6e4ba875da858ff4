//! Socket address parsing.
//!
//! Addresses have the form `"<scheme>://<rest>"`. The scheme selects a
//! registered transport by exact, case-sensitive name; what `<rest>` means
//! is up to that transport.

use crate::error::{Result, SpError};

/// Maximum total length of a socket address, scheme included.
pub const MAX_ADDR_LEN: usize = 128;

/// Split an address into `(scheme, rest)`.
///
/// # Errors
///
/// - [`SpError::InvalidArgument`] when the address exceeds [`MAX_ADDR_LEN`],
///   the `"://"` separator is missing, or the scheme is empty.
///
/// # Examples
///
/// ```
/// use filament_core::addr::split_scheme;
///
/// let (scheme, rest) = split_scheme("inproc://reqrep-test").unwrap();
/// assert_eq!(scheme, "inproc");
/// assert_eq!(rest, "reqrep-test");
/// ```
pub fn split_scheme(addr: &str) -> Result<(&str, &str)> {
    if addr.len() > MAX_ADDR_LEN {
        return Err(SpError::InvalidArgument);
    }
    let (scheme, rest) = addr.split_once("://").ok_or(SpError::InvalidArgument)?;
    if scheme.is_empty() {
        return Err(SpError::InvalidArgument);
    }
    Ok((scheme, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_basic() {
        assert_eq!(split_scheme("tcp://127.0.0.1:5555").unwrap(), ("tcp", "127.0.0.1:5555"));
        assert_eq!(split_scheme("inproc://a").unwrap(), ("inproc", "a"));
    }

    #[test]
    fn test_missing_separator() {
        assert_eq!(split_scheme("tcp:127.0.0.1").unwrap_err(), SpError::InvalidArgument);
        assert_eq!(split_scheme("").unwrap_err(), SpError::InvalidArgument);
    }

    #[test]
    fn test_empty_scheme() {
        assert_eq!(split_scheme("://rest").unwrap_err(), SpError::InvalidArgument);
    }

    #[test]
    fn test_empty_rest_is_allowed_here() {
        // The transport decides whether an empty remainder is valid.
        assert_eq!(split_scheme("inproc://").unwrap(), ("inproc", ""));
    }

    #[test]
    fn test_oversized_address() {
        let addr = format!("inproc://{}", "x".repeat(MAX_ADDR_LEN));
        assert_eq!(split_scheme(&addr).unwrap_err(), SpError::InvalidArgument);
    }
}
