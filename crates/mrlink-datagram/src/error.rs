/// Errors that can occur while building or decoding datagrams.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DatagramError {
    /// The address does not fit in an unsigned byte.
    #[error("address={0}; must be unsigned byte")]
    AddressOutOfRange(usize),

    /// The payload length does not fit in an unsigned byte.
    #[error("length={0}; must be unsigned byte")]
    LengthOutOfRange(usize),

    /// The payload is larger than the buffer allocated for it.
    #[error("payload of {len} bytes exceeds allocated {allocated}")]
    PayloadExceedsAllocation { len: usize, allocated: usize },

    /// Fewer bytes than the header (or declared payload) requires.
    #[error("truncated datagram ({actual} bytes, expected {expected})")]
    Truncated { expected: usize, actual: usize },

    /// The sync markers do not match the datagram's role.
    #[error("invalid sync bytes {actual:02x?} (expected {expected:02x?})")]
    InvalidSync { expected: [u8; 2], actual: [u8; 2] },
}

pub type Result<T> = std::result::Result<T, DatagramError>;
