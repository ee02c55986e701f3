use std::fmt;
use std::io;

// Exit code conventions: sysexits-style usage errors, timeout per coreutils.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn endpoint_error(context: &str, err: termlink_endpoint::EndpointError) -> CliError {
    match err {
        termlink_endpoint::EndpointError::Bind { source, .. }
        | termlink_endpoint::EndpointError::Io(source) => io_error(context, source),
    }
}

pub fn frame_error(context: &str, err: termlink_frame::FrameError) -> CliError {
    CliError::new(FAILURE, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_exit_codes() {
        let timeout = io_error("ctx", io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert_eq!(timeout.code, TIMEOUT);

        let refused = io_error("ctx", io::Error::new(io::ErrorKind::ConnectionRefused, "no"));
        assert_eq!(refused.code, FAILURE);

        let other = io_error("ctx", io::Error::other("boom"));
        assert_eq!(other.code, INTERNAL);
    }

    #[test]
    fn endpoint_errors_carry_context() {
        let err = termlink_endpoint::EndpointError::Io(io::Error::other("boom"));
        let cli = endpoint_error("listen failed", err);
        assert_eq!(cli.code, INTERNAL);
        assert!(cli.message.starts_with("listen failed"));
    }
}
