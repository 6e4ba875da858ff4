//! Endpoints: a socket's record of its binds and connects.

use std::fmt;

use crate::transport::Session;

/// One bound or connected address on a socket.
///
/// The endpoint owns the transport [`Session`] servicing it; dropping the
/// endpoint after the session confirms its stop releases the transport
/// resources.
pub struct Endpoint {
    id: u32,
    address: String,
    session: Box<dyn Session>,
}

impl Endpoint {
    pub(crate) fn new(id: u32, address: String, session: Box<dyn Session>) -> Self {
        Self {
            id,
            address,
            session,
        }
    }

    /// Endpoint id, unique within the owning socket.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The full `scheme://rest` address this endpoint was created with.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    pub(crate) fn session_mut(&mut self) -> &mut dyn Session {
        self.session.as_mut()
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
