/// Errors that can occur during package encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame does not start with the preamble sentinel.
    #[error("invalid frame preamble {byte:#04x} (expected 0xCE)")]
    InvalidPreamble { byte: u8 },

    /// The kind byte is outside the known package kinds.
    #[error("unknown package kind {0}")]
    UnknownKind(u8),

    /// The declared content length exceeds the configured maximum.
    #[error("content too large ({size} bytes, max {max})")]
    ContentTooLarge { size: usize, max: usize },

    /// The package name contains a NUL byte and cannot be framed.
    #[error("package name must not contain NUL")]
    InvalidName,

    /// The name field exceeds the maximum length (or its terminator never
    /// arrived within that bound).
    #[error("package name too long ({len} bytes, max {max})")]
    NameTooLong { len: usize, max: usize },

    /// A string payload contains a NUL byte and cannot be framed.
    #[error("string payload must not contain NUL")]
    InvalidString,

    /// The content region is malformed for the declared kind.
    #[error("malformed {kind} content ({len} bytes)")]
    BadContent { kind: &'static str, len: usize },

    /// A name or string payload is not valid UTF-8.
    #[error("invalid UTF-8 in {what}")]
    InvalidUtf8 { what: &'static str },
}

pub type Result<T> = std::result::Result<T, FrameError>;
