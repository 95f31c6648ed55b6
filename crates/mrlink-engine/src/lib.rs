//! Request/response engine for controllers on unreliable serial links.
//!
//! [`ProtocolEngine`] turns "read N bytes at address A" and "write these
//! bytes at address A" into datagram exchanges over a
//! [`Transport`](mrlink_transport::Transport), with payload-length-aware
//! timeouts, stream resynchronization, bounded retries, and a circuit
//! breaker on sustained failure.
//!
//! Also here: [`PretendDevice`], a simulated controller, and [`Poller`],
//! which keeps a register window fresh on a background thread.

pub mod clock;
pub mod config;
pub mod connector;
pub mod engine;
pub mod error;
pub mod poller;
pub mod pretend;
pub mod sync;
pub mod timing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use connector::{open_serial, open_serial_with_config};
pub use engine::{Disposition, ProtocolEngine};
pub use error::{CommContext, CommError, CommKind, Result};
pub use poller::{PollExit, Poller, PollerConfig, ShutdownReason, Snapshot};
pub use pretend::{PretendDevice, PRETEND_DEVICE_ID, REGISTER_COUNT};
pub use sync::SyncState;
pub use timing::TimingConfig;
