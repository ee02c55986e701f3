use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use bytes::Bytes;
use tracing::{debug, info, warn};

use termlink_frame::Package;

use crate::connection::{Connection, EndpointCore};
use crate::handlers::PackageHandlers;

/// TCP client endpoint: connects synchronously to a named server.
///
/// `connect` blocks the calling thread until the connection is established or
/// resolution/connection definitively fails; there is no timeout or
/// cancellation, so a stalled resolution blocks indefinitely — callers must
/// account for that externally. Reconnection after a disconnect requires
/// calling `connect` again.
pub struct ClientEndpoint {
    core: EndpointCore,
}

impl ClientEndpoint {
    pub fn new() -> Self {
        Self {
            core: EndpointCore::new(),
        }
    }

    /// Resolve `host:port` and connect, trying each resolved address in turn.
    ///
    /// Returns `true` once connected. `on_disconnect` is invoked with the
    /// server address exactly once, when this connection ends for any reason.
    /// A successful connect replaces (closes) any previous Active connection,
    /// whose own notification fires first.
    pub fn connect(
        &self,
        host: &str,
        port: u16,
        on_disconnect: impl FnOnce(SocketAddr) + Send + 'static,
    ) -> bool {
        let addrs = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(err) => {
                warn!(host, port, %err, "resolution failed");
                return false;
            }
        };

        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect(addr) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(err) => debug!(%addr, %err, "connect attempt failed"),
            }
        }
        let Some(stream) = stream else {
            warn!(host, port, "connection failed on all resolved addresses");
            return false;
        };

        // The previous connection, if still installed, retires first so its
        // disconnect notification cannot be confused with the new one's.
        if let Some(old) = self.core.detach() {
            drop(old);
        }

        match Connection::start(stream, self.core.handlers_arc(), on_disconnect) {
            Ok(conn) => {
                info!(host, port, peer = %conn.peer(), "connected");
                self.core.install(conn);
                true
            }
            Err(err) => {
                warn!(host, port, %err, "failed to start connection");
                false
            }
        }
    }

    /// Close the Active connection, if any. Its disconnect notification
    /// fires through the normal path.
    pub fn disconnect(&self) {
        if let Some(conn) = self.core.detach() {
            drop(conn);
        }
    }

    /// Receive handler registration, one handler per package kind.
    pub fn handlers(&self) -> &PackageHandlers {
        self.core.handlers()
    }

    /// Whether a connection is currently Active.
    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    /// Remote address of the Active connection, if any.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.core.peer_addr()
    }

    /// Queue a single-string package. Returns `false` when not connected.
    pub fn send_single_string(&self, name: &str, value: &str) -> bool {
        self.core.send(&Package::single_string(name, value))
    }

    /// Queue a single-int32 package. Returns `false` when not connected.
    pub fn send_single_int32(&self, name: &str, value: i32) -> bool {
        self.core.send(&Package::single_int32(name, value))
    }

    /// Queue a bytes package. Returns `false` when not connected.
    pub fn send_bytes(&self, name: &str, data: impl Into<Bytes>) -> bool {
        self.core.send(&Package::bytes(name, data))
    }

    /// Queue a string-list package. Returns `false` when not connected.
    pub fn send_string_list(&self, name: &str, values: Vec<String>) -> bool {
        self.core.send(&Package::string_list(name, values))
    }
}

impl Default for ClientEndpoint {
    fn default() -> Self {
        Self::new()
    }
}
