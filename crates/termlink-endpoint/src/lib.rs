//! Single-peer TCP endpoints over the termlink frame protocol.
//!
//! A [`ServerEndpoint`] accepts at most one live connection at a time (a new
//! accept preempts the old connection); a [`ClientEndpoint`] connects
//! synchronously by host and port. Both expose non-blocking typed send
//! operations and per-kind receive handlers, with all socket I/O performed on
//! worker threads owned by the connection. The disconnect notification fires
//! exactly once per connection lifetime, whether the peer closed, the local
//! side called disconnect, or a new connection replaced the old one.

pub mod client;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod server;

pub use client::ClientEndpoint;
pub use error::{EndpointError, Result};
pub use handlers::PackageHandlers;
pub use server::ServerEndpoint;
