use bytes::BytesMut;
use tracing::warn;

use crate::codec::{decode_package, DEFAULT_MAX_CONTENT};
use crate::error::Result;
use crate::package::Package;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Buffered-bytes threshold above which a one-shot warning is logged.
const LARGE_BUFFER_WARN: usize = 1024 * 1024;

/// Reassembles packages from an arbitrarily chunked incoming byte stream.
///
/// The assembler is resumable at any byte boundary: a single chunk may
/// complete zero, one, or many frames, and one frame may span many chunks.
/// Partial-frame state lives in the accumulation buffer between calls; the
/// buffer grows to the largest frame seen and is reused across frames.
///
/// A preamble mismatch or unknown kind surfaces as an error from
/// [`next_package`](Self::next_package). There is no forward-scan
/// resynchronization — the conservative policy is that the connection owning
/// this assembler terminates on the first framing error.
#[derive(Debug)]
pub struct ReceiveAssembler {
    buf: BytesMut,
    max_content: usize,
    warned_large: bool,
}

impl ReceiveAssembler {
    /// Create an assembler with the default content cap.
    pub fn new() -> Self {
        Self::with_max_content(DEFAULT_MAX_CONTENT)
    }

    /// Create an assembler with an explicit per-package content cap.
    pub fn with_max_content(max_content: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_content,
            warned_large: false,
        }
    }

    /// Append a chunk of raw bytes read from the transport.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        if !self.warned_large && self.buf.len() >= LARGE_BUFFER_WARN {
            self.warned_large = true;
            warn!(
                buffered = self.buf.len(),
                "receive buffer passed 1 MiB; expect large frames or a slow consumer"
            );
        }
    }

    /// Take the next completed package, if the buffered bytes hold one.
    ///
    /// Call repeatedly after each [`feed`](Self::feed) until it returns
    /// `Ok(None)`; completed packages come out in wire order.
    pub fn next_package(&mut self) -> Result<Option<Package>> {
        decode_package(&mut self.buf, self.max_content)
    }

    /// Number of bytes currently buffered (partial-frame state).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl Default for ReceiveAssembler {
    fn default() -> Self {
        Self::new()
    }
}
