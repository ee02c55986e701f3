//! Preamble-framed typed package protocol for point-to-point TCP links.
//!
//! Every package is framed with:
//! - A 1-byte preamble (0xCE) for stream synchronization
//! - A 1-byte package kind
//! - A NUL-terminated name tag
//! - A 4-byte little-endian content length
//! - The kind-dependent content bytes
//!
//! No partial reads, no buffer management in user code: the
//! [`ReceiveAssembler`] turns arbitrarily chunked input into whole packages.

pub mod assembler;
pub mod codec;
pub mod error;
pub mod package;

pub use assembler::ReceiveAssembler;
pub use codec::{decode_package, encode_package, DEFAULT_MAX_CONTENT, MAX_NAME_LEN, PREAMBLE};
pub use error::{FrameError, Result};
pub use package::{Package, PackageKind, Payload};
