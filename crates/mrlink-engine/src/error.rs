use std::fmt;

use mrlink_datagram::DatagramError;
use mrlink_transport::TransportError;

/// The failure class of a protocol or timeout error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommKind {
    FailureRead,
    FailureWrite,
    TimeoutRead,
    TimeoutWrite,
    ErrorRead,
    ErrorWrite,
    SyncLost,
    PayloadErrorRead,
    PayloadErrorWrite,
    TypeErrorRead,
    TypeErrorWrite,
}

impl CommKind {
    pub(crate) fn failure(write: bool) -> Self {
        if write {
            Self::FailureWrite
        } else {
            Self::FailureRead
        }
    }

    pub(crate) fn timeout(write: bool) -> Self {
        if write {
            Self::TimeoutWrite
        } else {
            Self::TimeoutRead
        }
    }

    pub(crate) fn error(write: bool) -> Self {
        if write {
            Self::ErrorWrite
        } else {
            Self::ErrorRead
        }
    }

    pub(crate) fn payload_error(write: bool) -> Self {
        if write {
            Self::PayloadErrorWrite
        } else {
            Self::PayloadErrorRead
        }
    }

    pub(crate) fn type_error(write: bool) -> Self {
        if write {
            Self::TypeErrorWrite
        } else {
            Self::TypeErrorRead
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailureRead => "comm failure read",
            Self::FailureWrite => "comm failure write",
            Self::TimeoutRead => "comm timeout awaiting response (read)",
            Self::TimeoutWrite => "comm timeout awaiting response (write)",
            Self::ErrorRead => "comm error read",
            Self::ErrorWrite => "comm error write",
            Self::SyncLost => "comm sync lost",
            Self::PayloadErrorRead => "comm payload error read",
            Self::PayloadErrorWrite => "comm payload error write",
            Self::TypeErrorRead => "comm type error read",
            Self::TypeErrorWrite => "comm type error write",
        }
    }
}

impl fmt::Display for CommKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a protocol or timeout error happened.
///
/// Only headers are captured; payload bytes never appear here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommContext {
    pub device: String,
    pub address: u8,
    /// Requested payload length (read) or written length (write).
    pub length: usize,
    /// Hex dump of the request header.
    pub request: String,
    /// Hex dump of the response header, when one was received.
    pub response: Option<String>,
}

impl fmt::Display for CommContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: addr={} len={} request={}",
            self.device, self.address, self.length, self.request
        )?;
        if let Some(response) = &self.response {
            write!(f, " response={response}")?;
        }
        Ok(())
    }
}

/// Errors that can occur while exchanging datagrams with a controller.
#[derive(Debug, thiserror::Error)]
pub enum CommError {
    /// No (complete) response arrived in time.
    #[error("{kind}: {detail} [{context}]")]
    Timeout {
        kind: CommKind,
        context: Box<CommContext>,
        detail: String,
    },

    /// The bytes received were inconsistent with the request, or framing was lost.
    #[error("{kind} [{context}]")]
    Protocol {
        kind: CommKind,
        context: Box<CommContext>,
    },

    /// Some, but not all, of the expected bytes arrived.
    #[error("short read ({what}): got {actual} of {expected} bytes [{context}]")]
    ShortRead {
        what: &'static str,
        expected: usize,
        actual: usize,
        context: Box<CommContext>,
    },

    /// The link is closed.
    #[error("device closed")]
    DeviceClosed,

    /// The sequential error threshold was exceeded.
    #[error("{device}: too many sequential comm errors on device")]
    TooManySequentialErrors { device: String },

    /// A read interrupt was requested.
    #[error("read interrupted")]
    Interrupted,

    /// Other link-level failure.
    #[error("transport error: {0}")]
    Transport(#[source] TransportError),

    /// The caller asked for something that cannot be framed.
    #[error("datagram error: {0}")]
    Datagram(#[from] DatagramError),
}

impl CommError {
    /// Whether the outer retry loop may try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Protocol { .. } | Self::ShortRead { .. } | Self::Transport(_)
        )
    }

    /// Whether a failed attempt ending in this error counts toward the
    /// sequential error threshold.
    pub(crate) fn counts_toward_breaker(&self) -> bool {
        !matches!(self, Self::Interrupted | Self::Datagram(_))
    }

    /// The protocol/timeout class, if this error has one.
    pub fn kind(&self) -> Option<CommKind> {
        match self {
            Self::Timeout { kind, .. } | Self::Protocol { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn context(&self) -> Option<&CommContext> {
        match self {
            Self::Timeout { context, .. }
            | Self::Protocol { context, .. }
            | Self::ShortRead { context, .. } => Some(context),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<TransportError> for CommError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => Self::DeviceClosed,
            TransportError::Interrupted => Self::Interrupted,
            other => Self::Transport(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, CommError>;
