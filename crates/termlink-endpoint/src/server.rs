use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use tracing::{debug, info, warn};

use termlink_frame::Package;

use crate::connection::{in_disconnect_notify, Connection, EndpointCore};
use crate::error::{EndpointError, Result};
use crate::handlers::PackageHandlers;

type DisconnectHandler = Arc<dyn Fn(SocketAddr) + Send + Sync>;

/// TCP server endpoint: accepts at most one live connection at a time.
///
/// Once armed with [`start_accept`](Self::start_accept), the accept loop
/// keeps accepting the next incoming request even while a connection is
/// Active; a new accept forcibly closes the existing connection (its
/// disconnect notification fires) before the new one takes over.
///
/// The handle is cheap to clone, so a disconnect callback can capture one —
/// the documented way to keep a server continuously available is to hold a
/// clone in the callback and rely on the loop staying armed.
#[derive(Clone)]
pub struct ServerEndpoint {
    shared: Arc<ServerShared>,
}

struct ServerShared {
    listener: TcpListener,
    local_addr: SocketAddr,
    core: EndpointCore,
    on_disconnect: Mutex<Option<DisconnectHandler>>,
    accept_armed: AtomicBool,
    shutting_down: AtomicBool,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ServerEndpoint {
    /// Bind a listener on `0.0.0.0:port`. Port 0 picks an ephemeral port
    /// (see [`local_port`](Self::local_port)). Incoming connections are not
    /// accepted until [`start_accept`](Self::start_accept) is called.
    pub fn listen(port: u16) -> Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let listener =
            TcpListener::bind(addr).map_err(|source| EndpointError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening");

        Ok(Self {
            shared: Arc::new(ServerShared {
                listener,
                local_addr,
                core: EndpointCore::new(),
                on_disconnect: Mutex::new(None),
                accept_armed: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                accept_thread: Mutex::new(None),
            }),
        })
    }

    /// Arm the accept loop with a disconnect handler.
    ///
    /// The handler is invoked with the remote peer address, exactly once per
    /// connection lifetime. Idempotent: calling again (including from inside
    /// the disconnect callback) updates the stored handler for subsequent
    /// connections without spawning a second loop.
    pub fn start_accept(
        &self,
        on_disconnect: impl Fn(SocketAddr) + Send + Sync + 'static,
    ) -> Result<()> {
        *self.shared.on_disconnect.lock().expect("handler lock") = Some(Arc::new(on_disconnect));

        if self.shared.accept_armed.swap(true, Ordering::AcqRel) {
            return Ok(()); // loop already running; handler updated above
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("termlink-accept".into())
            .spawn(move || accept_loop(shared))?;
        *self.shared.accept_thread.lock().expect("thread lock") = Some(handle);
        Ok(())
    }

    /// Close the Active connection, if any.
    ///
    /// Its disconnect notification fires through the normal path; listening,
    /// if armed, continues.
    pub fn disconnect(&self) {
        if let Some(conn) = self.shared.core.detach() {
            drop(conn);
        }
    }

    /// Stop the accept loop and close any Active connection. Terminal: a
    /// shut-down server does not re-arm.
    ///
    /// The blocking accept is woken with a throwaway loopback connection so
    /// the loop stops deterministically. Safe to call from inside the
    /// disconnect callback: in that case the accept thread is not joined
    /// (during a replacement it is itself waiting on the receive thread that
    /// runs the callback, so joining it would close a cycle), and it winds
    /// down on its own after the wake.
    pub fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }

        if self.shared.accept_armed.load(Ordering::Acquire) {
            let _ = TcpStream::connect((Ipv4Addr::LOCALHOST, self.shared.local_addr.port()));
        }
        let handle = self.shared.accept_thread.lock().expect("thread lock").take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && !in_disconnect_notify() {
                let _ = handle.join();
            }
        }

        self.disconnect();
    }

    /// Receive handler registration, one handler per package kind.
    pub fn handlers(&self) -> &PackageHandlers {
        self.shared.core.handlers()
    }

    /// Whether a connection is currently Active.
    pub fn is_connected(&self) -> bool {
        self.shared.core.is_connected()
    }

    /// Remote address of the Active connection, if any.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.core.peer_addr()
    }

    /// The bound local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// The bound local port (useful after binding port 0).
    pub fn local_port(&self) -> u16 {
        self.shared.local_addr.port()
    }

    /// Queue a single-string package. Returns `false` when not connected.
    pub fn send_single_string(&self, name: &str, value: &str) -> bool {
        self.shared.core.send(&Package::single_string(name, value))
    }

    /// Queue a single-int32 package. Returns `false` when not connected.
    pub fn send_single_int32(&self, name: &str, value: i32) -> bool {
        self.shared.core.send(&Package::single_int32(name, value))
    }

    /// Queue a bytes package. Returns `false` when not connected.
    pub fn send_bytes(&self, name: &str, data: impl Into<Bytes>) -> bool {
        self.shared.core.send(&Package::bytes(name, data))
    }

    /// Queue a string-list package. Returns `false` when not connected.
    pub fn send_string_list(&self, name: &str, values: Vec<String>) -> bool {
        self.shared.core.send(&Package::string_list(name, values))
    }
}

impl ServerShared {
    fn install_connection(&self, stream: TcpStream, peer: SocketAddr) {
        // Single-peer invariant: the old connection closes, and its
        // disconnect ticket fires, before the new one goes Active.
        if let Some(old) = self.core.detach() {
            debug!(old_peer = %old.peer(), new_peer = %peer, "replacing active connection");
            drop(old);
        }

        // The old connection's callback may have shut the server down.
        if self.shutting_down.load(Ordering::Acquire) {
            debug!(%peer, "discarding accepted connection, server shutting down");
            return;
        }

        let handler = self.on_disconnect.lock().expect("handler lock").clone();
        let notify = move |peer| {
            if let Some(handler) = handler {
                handler(peer);
            }
        };

        match Connection::start(stream, self.core.handlers_arc(), notify) {
            Ok(conn) => {
                info!(%peer, "connection established");
                self.core.install(conn);
            }
            Err(err) => warn!(%peer, %err, "failed to start accepted connection"),
        }
    }
}

fn accept_loop(shared: Arc<ServerShared>) {
    loop {
        match shared.listener.accept() {
            Ok((stream, peer)) => {
                if shared.shutting_down.load(Ordering::Acquire) {
                    break; // shutdown() wake-up
                }
                debug!(%peer, "accepted connection");
                shared.install_connection(stream, peer);
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                if shared.shutting_down.load(Ordering::Acquire) {
                    break;
                }
                warn!(%err, "accept failed");
            }
        }
    }
    debug!("accept loop stopped");
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use bytes::BytesMut;

    use termlink_frame::{encode_package, ReceiveAssembler};

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + TIMEOUT;
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn encode(package: &Package) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_package(package, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn receives_packages_in_wire_order() {
        let server = ServerEndpoint::listen(0).unwrap();
        let (tx, rx) = mpsc::channel();
        server.handlers().set_single_int32(move |name, value| {
            tx.send((name.to_owned(), value)).unwrap();
        });
        server.start_accept(|_| {}).unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", server.local_port())).unwrap();
        client
            .write_all(&encode(&Package::single_int32("a", 1)))
            .unwrap();
        client
            .write_all(&encode(&Package::single_int32("b", 2)))
            .unwrap();
        client
            .write_all(&encode(&Package::single_int32("c", 3)))
            .unwrap();

        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ("a".to_owned(), 1));
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ("b".to_owned(), 2));
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ("c".to_owned(), 3));

        server.shutdown();
    }

    #[test]
    fn server_sends_to_connected_peer() {
        let server = ServerEndpoint::listen(0).unwrap();
        server.start_accept(|_| {}).unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", server.local_port())).unwrap();
        wait_for(|| server.is_connected());

        assert!(server.send_string_list(
            "L",
            vec!["A".to_owned(), "B".to_owned(), String::new()]
        ));

        let mut assembler = ReceiveAssembler::new();
        let mut chunk = [0u8; 1024];
        let package = loop {
            let n = client.read(&mut chunk).unwrap();
            assert!(n > 0, "peer closed before package arrived");
            assembler.feed(&chunk[..n]);
            if let Some(package) = assembler.next_package().unwrap() {
                break package;
            }
        };

        assert_eq!(
            package,
            Package::string_list("L", vec!["A".into(), "B".into(), "".into()])
        );

        server.shutdown();
    }

    #[test]
    fn new_accept_replaces_active_connection() {
        let server = ServerEndpoint::listen(0).unwrap();
        let disconnects = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        let counter = Arc::clone(&disconnects);
        server
            .start_accept(move |peer| {
                counter.fetch_add(1, Ordering::SeqCst);
                tx.send(peer).unwrap();
            })
            .unwrap();

        let mut first = TcpStream::connect(("127.0.0.1", server.local_port())).unwrap();
        wait_for(|| server.is_connected());
        let first_local = first.local_addr().unwrap();

        // Second connection preempts: the first peer's notification fires
        // before the replacement goes Active.
        let _second = TcpStream::connect(("127.0.0.1", server.local_port())).unwrap();

        let dropped = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(dropped, first_local);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);

        // The first stream is really gone: reads see EOF.
        first
            .set_read_timeout(Some(TIMEOUT))
            .unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(first.read(&mut buf).unwrap(), 0);

        wait_for(|| server.is_connected());

        // Explicit disconnect of the replacement is the second and last firing.
        server.disconnect();
        rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(disconnects.load(Ordering::SeqCst), 2);

        server.shutdown();
        assert_eq!(disconnects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn peer_close_fires_disconnect_once() {
        let server = ServerEndpoint::listen(0).unwrap();
        let disconnects = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        let counter = Arc::clone(&disconnects);
        server
            .start_accept(move |peer| {
                counter.fetch_add(1, Ordering::SeqCst);
                tx.send(peer).unwrap();
            })
            .unwrap();

        let client = TcpStream::connect(("127.0.0.1", server.local_port())).unwrap();
        wait_for(|| server.is_connected());
        drop(client);

        rx.recv_timeout(TIMEOUT).unwrap();
        // disconnect() after the peer already left must not fire again.
        server.disconnect();
        server.shutdown();
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn start_accept_is_safe_inside_disconnect_callback() {
        let server = ServerEndpoint::listen(0).unwrap();
        let (tx, rx) = mpsc::channel();

        let rearm = server.clone();
        server
            .start_accept(move |peer| {
                // Documented continuous-availability pattern.
                rearm.start_accept(|_| {}).unwrap();
                tx.send(peer).unwrap();
            })
            .unwrap();

        let client = TcpStream::connect(("127.0.0.1", server.local_port())).unwrap();
        wait_for(|| server.is_connected());
        drop(client);
        rx.recv_timeout(TIMEOUT).unwrap();

        // Server remains available for the next peer.
        let _next = TcpStream::connect(("127.0.0.1", server.local_port())).unwrap();
        wait_for(|| server.is_connected());

        server.shutdown();
    }

    #[test]
    fn shutdown_is_safe_inside_disconnect_callback() {
        let server = ServerEndpoint::listen(0).unwrap();
        let (tx, rx) = mpsc::channel();

        let closer = server.clone();
        server
            .start_accept(move |peer| {
                closer.shutdown();
                tx.send(peer).unwrap();
            })
            .unwrap();

        let _first = TcpStream::connect(("127.0.0.1", server.local_port())).unwrap();
        wait_for(|| server.is_connected());

        // Replacement puts the accept thread inside the old connection's
        // drop, waiting on the receive thread that runs the callback; the
        // callback's shutdown() must return instead of joining back.
        let _second = TcpStream::connect(("127.0.0.1", server.local_port())).unwrap();

        rx.recv_timeout(TIMEOUT)
            .expect("disconnect callback did not return from shutdown()");
        wait_for(|| !server.is_connected());
        server.shutdown();
    }

    #[test]
    fn send_without_connection_returns_false() {
        let server = ServerEndpoint::listen(0).unwrap();
        assert!(!server.send_single_string("name", "value"));
        assert!(!server.send_single_int32("name", 1));
        assert!(!server.send_bytes("name", vec![1u8]));
        assert!(!server.send_string_list("name", vec![]));
        server.shutdown();
    }

    #[test]
    fn shutdown_is_idempotent() {
        let server = ServerEndpoint::listen(0).unwrap();
        server.start_accept(|_| {}).unwrap();
        server.shutdown();
        server.shutdown();
    }
}
