//! Byte-oriented device transport abstraction.
//!
//! Provides the interface the protocol engine uses to talk to a peripheral
//! controller:
//! - [`Transport`]: blocking writes, timeout-bounded reads, packet-boundary hints
//! - [`LinkControl`]: open/interrupt flags shared with other threads
//! - [`SerialTransport`]: a tty-backed implementation over `serialport`
//!
//! This is the lowest layer of mrlink. Everything else builds on top of
//! the [`Transport`] trait provided here.

pub mod error;
pub mod marked;
pub mod serial;
pub mod traits;

pub use error::{Result, TransportError};
pub use marked::MarkedQueue;
pub use serial::{list_ports, PortInfo, SerialConfig, SerialTransport};
pub use traits::{LinkControl, Transport};
