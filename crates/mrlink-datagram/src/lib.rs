//! Fixed-header datagram framing for controller links.
//!
//! Every datagram exchanged with the controller is framed as:
//! - 2 sync marker bytes (role-specific) for stream synchronization
//! - 1 function byte (bit 7 = read, bits 0-6 = function code)
//! - 1 address byte
//! - 1 payload length byte, followed by that many payload bytes
//!
//! Buffers are recycled through a small [`AllocationPool`] so the steady-state
//! polling loop does not allocate.

pub mod datagram;
pub mod dump;
pub mod error;
pub mod pool;

pub use datagram::{
    Datagram, Request, Response, Role, HEADER_SIZE, MAX_PAYLOAD, REQUEST_SYNC, RESPONSE_SYNC,
};
pub use dump::{hex_dump, MAX_DUMP_BYTES};
pub use error::{DatagramError, Result};
pub use pool::{AllocationPool, PoolStats, Pooled, POOL_DEPTH};
