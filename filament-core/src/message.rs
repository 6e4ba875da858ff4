//! Message envelope: header + body byte buffers.
//!
//! A [`Msg`] is the unit of transfer between sockets. The header carries
//! protocol metadata (e.g. the REQ correlation id); the body carries the
//! application payload. Both buffers are independently resizable.
//!
//! Ownership is expressed in the type system rather than by reference
//! counting: `Msg` is a move-only value, [`Msg::take`] transfers ownership
//! leaving the source valid-but-empty, and `clone` always produces a deep,
//! independently mutable copy.
//!
//! # Examples
//!
//! ```
//! use filament_core::message::Msg;
//!
//! let mut msg = Msg::from_chunk(b"ping".as_ref());
//! assert_eq!(msg.body(), b"ping");
//!
//! let moved = msg.take();
//! assert!(msg.is_empty());
//! assert_eq!(moved.body(), b"ping");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// A message envelope with independent header and body buffers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Msg {
    header: BytesMut,
    body: BytesMut,
}

impl Msg {
    /// Create an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a message with a zero-filled body of the given size.
    #[must_use]
    pub fn with_size(size: usize) -> Self {
        let mut body = BytesMut::with_capacity(size);
        body.put_bytes(0, size);
        Self {
            header: BytesMut::new(),
            body,
        }
    }

    /// Create a message from an externally allocated buffer ("chunk").
    #[must_use]
    pub fn from_chunk(chunk: impl AsRef<[u8]>) -> Self {
        Self {
            header: BytesMut::new(),
            body: BytesMut::from(chunk.as_ref()),
        }
    }

    /// Message body.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Mutable access to the body buffer.
    pub fn body_mut(&mut self) -> &mut BytesMut {
        &mut self.body
    }

    /// Protocol header.
    #[must_use]
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    /// Mutable access to the header buffer.
    pub fn header_mut(&mut self) -> &mut BytesMut {
        &mut self.header
    }

    /// Replace the header wholesale.
    pub fn set_header(&mut self, header: impl AsRef<[u8]>) {
        self.header = BytesMut::from(header.as_ref());
    }

    /// Body length in bytes. This is the value reported by `send`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// True when both header and body are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.body.is_empty()
    }

    /// Move the contents out, leaving this message valid but empty.
    ///
    /// Destroying (dropping) the emptied source afterwards is a no-op.
    #[must_use]
    pub fn take(&mut self) -> Msg {
        std::mem::take(self)
    }

    /// Consume the message and return the body as an immutable buffer.
    #[must_use]
    pub fn into_body(self) -> Bytes {
        self.body.freeze()
    }
}

impl From<Vec<u8>> for Msg {
    fn from(body: Vec<u8>) -> Self {
        Self {
            header: BytesMut::new(),
            body: BytesMut::from(body.as_slice()),
        }
    }
}

impl From<&[u8]> for Msg {
    fn from(body: &[u8]) -> Self {
        Self::from_chunk(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_size_zero_filled() {
        let msg = Msg::with_size(8);
        assert_eq!(msg.len(), 8);
        assert_eq!(msg.body(), &[0u8; 8]);
    }

    #[test]
    fn test_take_leaves_source_empty() {
        let mut msg = Msg::from_chunk(b"payload");
        let moved = msg.take();
        assert!(msg.is_empty());
        assert_eq!(moved.body(), b"payload");
        // Dropping the emptied source is a no-op
        drop(msg);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut a = Msg::from_chunk(b"aaaa");
        let mut b = a.clone();
        b.body_mut().clear();
        b.body_mut().extend_from_slice(b"bbbb");
        assert_eq!(a.body(), b"aaaa");
        assert_eq!(b.body(), b"bbbb");
        a.header_mut().extend_from_slice(&[1, 2, 3, 4]);
        assert!(b.header().is_empty());
    }

    #[test]
    fn test_header_round_trip() {
        let mut msg = Msg::from_chunk(b"body");
        msg.set_header([0x80, 0, 0, 1]);
        assert_eq!(msg.header(), &[0x80, 0, 0, 1]);
        assert_eq!(msg.len(), 4);
    }
}
