//! Reliable datagram exchange with peripheral controllers.
//!
//! mrlink talks to controllers that speak a fixed-header request/response
//! protocol over serial or USB CDC links that drop, split, and garble
//! bytes.
//!
//! # Crate Structure
//!
//! - [`transport`]: Byte-link abstraction and the serial port implementation
//! - [`datagram`]: Wire format, buffer pooling, diagnostic dumps
//! - [`engine`]: Retrying request/response engine, simulated device, poll loop (behind `engine` feature)

/// Re-export transport types.
pub mod transport {
    pub use mrlink_transport::*;
}

/// Re-export datagram types.
pub mod datagram {
    pub use mrlink_datagram::*;
}

/// Re-export engine types (requires `engine` feature).
#[cfg(feature = "engine")]
pub mod engine {
    pub use mrlink_engine::*;
}
