use std::net::SocketAddr;

/// Errors that can occur in endpoint setup operations.
///
/// Failures on an already-Active connection are never surfaced here; they
/// arrive as the disconnect notification or as a `false` send result.
/// Resolution and connect failures likewise report as `false` from
/// [`connect`](crate::ClientEndpoint::connect).
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// Failed to bind the listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// An I/O error occurred while setting up a connection.
    #[error("endpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EndpointError>;
