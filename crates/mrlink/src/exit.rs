use std::fmt;
use std::io;

use mrlink_datagram::DatagramError;
use mrlink_engine::{CommError, ShutdownReason};
use mrlink_transport::TransportError;

// Exit codes. 64 matches sysexits EX_USAGE and 124 matches timeout(1).
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
/// The circuit breaker tripped: the controller failed too many times in a row.
pub const CIRCUIT_OPEN: i32 = 70;
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
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Io(source) => io_error(context, source),
        TransportError::Open { ref source, .. } => {
            let code = match source.kind() {
                serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => PERMISSION_DENIED,
                _ => TRANSPORT_ERROR,
            };
            CliError::new(code, format!("{context}: {err}"))
        }
        TransportError::Interrupted => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn datagram_error(context: &str, err: DatagramError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn comm_error(context: &str, err: CommError) -> CliError {
    match err {
        CommError::Transport(err) => transport_error(context, err),
        CommError::Datagram(err) => datagram_error(context, err),
        CommError::Timeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        CommError::TooManySequentialErrors { .. } => {
            CliError::new(CIRCUIT_OPEN, format!("{context}: {err}"))
        }
        CommError::DeviceClosed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

/// Exit code for a poll loop that stopped without a recorded error.
pub fn shutdown_code(reason: ShutdownReason) -> i32 {
    match reason {
        ShutdownReason::Normal => SUCCESS,
        ShutdownReason::AbnormalAttemptReopen => TIMEOUT,
        ShutdownReason::Abnormal => TRANSPORT_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comm_errors_map_to_stable_codes() {
        let breaker = CommError::TooManySequentialErrors {
            device: "pretend".to_string(),
        };
        assert_eq!(comm_error("read failed", breaker).code, CIRCUIT_OPEN);
        assert_eq!(
            comm_error("read failed", CommError::DeviceClosed).code,
            TRANSPORT_ERROR
        );
        assert_eq!(
            comm_error(
                "read failed",
                CommError::Datagram(DatagramError::AddressOutOfRange(256))
            )
            .code,
            DATA_INVALID
        );
        assert_eq!(
            comm_error("read failed", CommError::Interrupted).code,
            FAILURE
        );
    }

    #[test]
    fn io_permission_denied_is_distinct() {
        let err = transport_error(
            "open failed",
            TransportError::Io(io::Error::from(io::ErrorKind::PermissionDenied)),
        );
        assert_eq!(err.code, PERMISSION_DENIED);
    }
}
