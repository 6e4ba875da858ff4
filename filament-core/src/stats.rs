//! Per-socket statistics counters.
//!
//! Counters are plain integers mutated only inside the owning socket's
//! execution context; readers take a [`SocketStats::snapshot`]. Soft
//! transport failures (broken connections, accept errors) are visible
//! here and nowhere else.

/// Counters kept by every socket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketStats {
    /// Connections successfully established by connecting endpoints.
    pub established_connections: u64,
    /// Connections accepted by bound endpoints.
    pub accepted_connections: u64,
    /// Connections dropped by this side.
    pub dropped_connections: u64,
    /// Connections that broke underneath us.
    pub broken_connections: u64,
    /// Failed connect attempts.
    pub connect_errors: u64,
    /// Failed bind attempts.
    pub bind_errors: u64,
    /// Failed accepts.
    pub accept_errors: u64,
    /// Messages handed to the transport layer.
    pub messages_sent: u64,
    /// Messages delivered to the application.
    pub messages_received: u64,
    /// Body bytes handed to the transport layer.
    pub bytes_sent: u64,
    /// Body bytes delivered to the application.
    pub bytes_received: u64,
    /// Pipes currently attached.
    pub current_connections: u64,
}

impl SocketStats {
    /// Fresh, all-zero counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one message going out.
    pub fn count_send(&mut self, bytes: usize) {
        self.messages_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    /// Record one message coming in.
    pub fn count_recv(&mut self, bytes: usize) {
        self.messages_received += 1;
        self.bytes_received += bytes as u64;
    }

    /// A pipe was attached.
    pub fn pipe_attached(&mut self, accepted: bool) {
        if accepted {
            self.accepted_connections += 1;
        } else {
            self.established_connections += 1;
        }
        self.current_connections += 1;
    }

    /// A pipe went away.
    pub fn pipe_detached(&mut self, broken: bool) {
        if broken {
            self.broken_connections += 1;
        } else {
            self.dropped_connections += 1;
        }
        self.current_connections = self.current_connections.saturating_sub(1);
    }

    /// Copy of the counters at this instant.
    #[must_use]
    pub fn snapshot(&self) -> SocketStats {
        self.clone()
    }
}

/// Identity labels attached to statistics records.
///
/// Resolved once per context from the environment: `FILAMENT_HOSTNAME`
/// and `FILAMENT_APP` override the reported host and application names.
#[derive(Debug, Clone)]
pub struct ReportLabels {
    /// Reported host name.
    pub hostname: String,
    /// Reported application name.
    pub appname: String,
}

impl ReportLabels {
    /// Resolve labels from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let hostname = std::env::var("FILAMENT_HOSTNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "localhost".to_string());
        let appname = std::env::var("FILAMENT_APP").unwrap_or_else(|_| {
            std::env::args()
                .next()
                .unwrap_or_else(|| "unknown".to_string())
        });
        Self { hostname, appname }
    }
}
