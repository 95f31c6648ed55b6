use std::path::PathBuf;

/// Errors that can occur in device transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the specified port.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: serialport::Error,
    },

    /// An I/O error occurred on the link.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link has been closed.
    #[error("device closed")]
    Closed,

    /// A read interrupt was requested while a read was in progress.
    #[error("read interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, TransportError>;
