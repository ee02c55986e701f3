use std::cell::Cell;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use termlink_frame::{encode_package, Package, ReceiveAssembler};

use crate::handlers::PackageHandlers;

const READ_CHUNK_SIZE: usize = 8 * 1024;

thread_local! {
    static IN_DISCONNECT_NOTIFY: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is inside a disconnect notification.
///
/// Teardown paths that would otherwise join other worker threads consult this
/// to avoid join cycles: during a connection replacement the accept thread is
/// already blocked joining the receive thread that runs the callback.
pub(crate) fn in_disconnect_notify() -> bool {
    IN_DISCONNECT_NOTIFY.with(Cell::get)
}

/// Single-fire handle for the disconnect notification.
///
/// The receive loop owns the ticket for as long as the connection is Active;
/// whichever exit path observes termination consumes it. Move semantics make
/// double delivery unrepresentable, even when the endpoint is reused for a
/// new connection immediately after the old one drops.
struct DisconnectTicket {
    peer: SocketAddr,
    notify: Box<dyn FnOnce(SocketAddr) + Send>,
}

impl DisconnectTicket {
    fn fire(self) {
        debug!(peer = %self.peer, "connection closed");
        IN_DISCONNECT_NOTIFY.with(|flag| flag.set(true));
        (self.notify)(self.peer);
        IN_DISCONNECT_NOTIFY.with(|flag| flag.set(false));
    }
}

/// One live connection: the socket, its worker threads, and the send queue.
///
/// The writer thread drains the send queue and performs all socket writes;
/// it parks on the empty queue when idle and exits when the queue closes or
/// the socket dies. The receive thread performs all socket reads, feeds the
/// assembler, dispatches completed packages, and fires the disconnect ticket
/// on any termination path. Caller threads never touch the socket.
pub(crate) struct Connection {
    peer: SocketAddr,
    stream: TcpStream,
    send_tx: Option<Sender<Bytes>>,
    active: Arc<AtomicBool>,
    receive_thread: Option<JoinHandle<()>>,
    writer_thread: Option<JoinHandle<()>>,
}

impl Connection {
    /// Take ownership of a connected stream and start the worker threads.
    ///
    /// `notify` is invoked with the peer address exactly once, when the
    /// connection ends for any reason.
    pub(crate) fn start(
        stream: TcpStream,
        handlers: Arc<PackageHandlers>,
        notify: impl FnOnce(SocketAddr) + Send + 'static,
    ) -> std::io::Result<Self> {
        let peer = stream.peer_addr()?;
        let read_stream = stream.try_clone()?;
        let write_stream = stream.try_clone()?;
        let active = Arc::new(AtomicBool::new(true));
        let (send_tx, send_rx) = mpsc::channel::<Bytes>();

        let ticket = DisconnectTicket {
            peer,
            notify: Box::new(notify),
        };

        let writer_thread = {
            let active = Arc::clone(&active);
            thread::Builder::new()
                .name("termlink-writer".into())
                .spawn(move || writer_loop(write_stream, send_rx, active))?
        };

        let receive_thread = {
            let active = Arc::clone(&active);
            thread::Builder::new()
                .name("termlink-receive".into())
                .spawn(move || receive_loop(read_stream, handlers, ticket, active))?
        };

        Ok(Self {
            peer,
            stream,
            send_tx: Some(send_tx),
            active,
            receive_thread: Some(receive_thread),
            writer_thread: Some(writer_thread),
        })
    }

    /// Serialize a package and queue it for transmission.
    ///
    /// Returns `true` if the connection accepted the buffer — queued, not
    /// delivered. Queued buffers go out in FIFO order. The package data is
    /// copied into the frame buffer, so the caller's values need not outlive
    /// this call.
    pub(crate) fn send(&self, package: &Package) -> bool {
        if !self.active.load(Ordering::Acquire) {
            return false;
        }

        let mut buf = BytesMut::new();
        if let Err(err) = encode_package(package, &mut buf) {
            warn!(name = %package.name, %err, "refusing to send unframeable package");
            return false;
        }

        match &self.send_tx {
            Some(tx) => tx.send(buf.freeze()).is_ok(),
            None => false,
        }
    }

    /// Tear down an Active connection.
    ///
    /// Shutting the socket down aborts the in-flight blocking read; the
    /// receive loop observes that and fires the disconnect ticket through the
    /// same path as a peer-initiated close. Idempotent.
    pub(crate) fn close(&self) {
        self.active.store(false, Ordering::Release);
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
        // Closing the queue unparks an idle writer.
        self.send_tx.take();

        let current = thread::current().id();
        for handle in [self.receive_thread.take(), self.writer_thread.take()]
            .into_iter()
            .flatten()
        {
            // A handler running on the receive thread may drop the connection
            // (e.g. disconnect() called from inside a callback); the thread
            // cannot join itself, and its loop is already on the way out.
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

fn writer_loop(mut stream: TcpStream, send_rx: Receiver<Bytes>, active: Arc<AtomicBool>) {
    while let Ok(buf) = send_rx.recv() {
        if let Err(err) = stream.write_all(&buf) {
            if active.load(Ordering::Acquire) {
                debug!(%err, "send failed, shutting down connection");
            }
            active.store(false, Ordering::Release);
            let _ = stream.shutdown(Shutdown::Both);
            break;
        }
    }
}

fn receive_loop(
    mut stream: TcpStream,
    handlers: Arc<PackageHandlers>,
    ticket: DisconnectTicket,
    active: Arc<AtomicBool>,
) {
    let mut assembler = ReceiveAssembler::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    'io: loop {
        let read = match stream.read(&mut chunk) {
            Ok(0) => break, // peer closed
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                if active.load(Ordering::Acquire) {
                    debug!(%err, "receive failed");
                }
                break;
            }
        };

        assembler.feed(&chunk[..read]);
        loop {
            match assembler.next_package() {
                Ok(Some(package)) => handlers.dispatch(&package),
                Ok(None) => break,
                Err(err) => {
                    // Conservative framing-error policy: no resynchronization,
                    // treat like a transport disconnect.
                    warn!(%err, "framing error, terminating connection");
                    break 'io;
                }
            }
        }
    }

    active.store(false, Ordering::Release);
    let _ = stream.shutdown(Shutdown::Both);
    ticket.fire();
}

/// Shared substance of the server and client endpoints: the registered
/// handlers and the at-most-one Active connection.
pub(crate) struct EndpointCore {
    handlers: Arc<PackageHandlers>,
    conn: Mutex<Option<Connection>>,
}

impl EndpointCore {
    pub(crate) fn new() -> Self {
        Self {
            handlers: Arc::new(PackageHandlers::default()),
            conn: Mutex::new(None),
        }
    }

    pub(crate) fn handlers(&self) -> &PackageHandlers {
        &self.handlers
    }

    pub(crate) fn handlers_arc(&self) -> Arc<PackageHandlers> {
        Arc::clone(&self.handlers)
    }

    /// Remove the current connection, if any, without closing it.
    ///
    /// Dropping the returned connection closes it and waits for its receive
    /// loop to fire the disconnect ticket; callers must do that outside any
    /// lock they hold.
    pub(crate) fn detach(&self) -> Option<Connection> {
        self.conn.lock().expect("connection lock").take()
    }

    /// Install a newly started connection as the Active one.
    ///
    /// Callers detach and drop the previous connection first, so that its
    /// disconnect ticket has fired before the replacement becomes Active. The
    /// lock is released before any leftover connection is dropped.
    pub(crate) fn install(&self, conn: Connection) {
        let replaced = self.conn.lock().expect("connection lock").replace(conn);
        drop(replaced);
    }

    pub(crate) fn send(&self, package: &Package) -> bool {
        match &*self.conn.lock().expect("connection lock") {
            Some(conn) => conn.send(package),
            None => false,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.conn
            .lock()
            .expect("connection lock")
            .as_ref()
            .is_some_and(Connection::is_active)
    }

    pub(crate) fn peer_addr(&self) -> Option<SocketAddr> {
        self.conn
            .lock()
            .expect("connection lock")
            .as_ref()
            .map(Connection::peer)
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    /// A connected loopback stream pair.
    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn start_silent(stream: TcpStream) -> Connection {
        Connection::start(stream, Arc::new(PackageHandlers::default()), |_| {}).unwrap()
    }

    #[test]
    fn serial_sends_arrive_in_order() {
        let (left, right) = tcp_pair();

        let (tx, rx) = mpsc::channel();
        let handlers = Arc::new(PackageHandlers::default());
        handlers.set_single_int32(move |name, value| {
            tx.send((name.to_owned(), value)).unwrap();
        });

        let receiver = Connection::start(right, handlers, |_| {}).unwrap();
        let sender = start_silent(left);

        assert!(sender.send(&Package::single_int32("a", 1)));
        assert!(sender.send(&Package::single_int32("b", 2)));
        assert!(sender.send(&Package::single_int32("c", 3)));

        let timeout = Duration::from_secs(5);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), ("a".to_owned(), 1));
        assert_eq!(rx.recv_timeout(timeout).unwrap(), ("b".to_owned(), 2));
        assert_eq!(rx.recv_timeout(timeout).unwrap(), ("c".to_owned(), 3));

        drop(sender);
        drop(receiver);
    }

    #[test]
    fn large_payload_crosses_many_reads() {
        let (left, right) = tcp_pair();

        let payload = vec![0xA5u8; 1024 * 1024];
        let (tx, rx) = mpsc::channel();
        let handlers = Arc::new(PackageHandlers::default());
        handlers.set_bytes(move |name, data| {
            tx.send((name.to_owned(), data.to_vec())).unwrap();
        });

        let receiver = Connection::start(right, handlers, |_| {}).unwrap();
        let sender = start_silent(left);

        assert!(sender.send(&Package::bytes("blob", payload.clone())));

        let (name, received) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(name, "blob");
        assert_eq!(received, payload);

        drop(sender);
        drop(receiver);
    }

    #[test]
    fn unhandled_kind_is_dropped_and_stream_continues() {
        let (left, right) = tcp_pair();

        let (tx, rx) = mpsc::channel();
        let handlers = Arc::new(PackageHandlers::default());
        handlers.set_single_string(move |name, value| {
            tx.send((name.to_owned(), value.to_owned())).unwrap();
        });

        let receiver = Connection::start(right, handlers, |_| {}).unwrap();
        let sender = start_silent(left);

        // No int32 handler registered: this one vanishes silently.
        assert!(sender.send(&Package::single_int32("ignored", 1)));
        assert!(sender.send(&Package::single_string("kept", "value")));

        let received = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(received, ("kept".to_owned(), "value".to_owned()));

        drop(sender);
        drop(receiver);
    }

    #[test]
    fn peer_close_fires_notification_exactly_once() {
        let (left, right) = tcp_pair();

        let fired = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        let counter = Arc::clone(&fired);
        let conn = Connection::start(right, Arc::new(PackageHandlers::default()), move |peer| {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send(peer).unwrap();
        })
        .unwrap();

        drop(left); // peer goes away

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // Explicit close after the fact must not fire it again.
        conn.close();
        drop(conn);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn explicit_close_fires_notification_exactly_once() {
        let (left, right) = tcp_pair();

        let fired = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        let counter = Arc::clone(&fired);
        let conn = Connection::start(right, Arc::new(PackageHandlers::default()), move |peer| {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send(peer).unwrap();
        })
        .unwrap();

        conn.close();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        conn.close();
        drop(conn);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        drop(left);
    }

    #[test]
    fn send_after_close_returns_false() {
        let (left, right) = tcp_pair();
        let conn = start_silent(right);

        conn.close();
        assert!(!conn.send(&Package::single_int32("late", 1)));
        drop(left);
    }

    #[test]
    fn framing_error_terminates_connection() {
        let (mut left, right) = tcp_pair();

        let fired = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        let counter = Arc::clone(&fired);
        let conn = Connection::start(right, Arc::new(PackageHandlers::default()), move |peer| {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send(peer).unwrap();
        })
        .unwrap();

        left.write_all(&[0x00, 0x00, 0x00]).unwrap(); // not a preamble

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!conn.is_active());
        drop(conn);
    }

    #[test]
    fn core_send_without_connection_returns_false() {
        let core = EndpointCore::new();
        assert!(!core.send(&Package::single_string("nobody", "home")));
        assert!(!core.is_connected());
        assert!(core.peer_addr().is_none());
    }
}
