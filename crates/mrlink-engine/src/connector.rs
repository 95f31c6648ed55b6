use std::path::Path;

use mrlink_transport::{SerialConfig, SerialTransport, Transport};

use crate::config::EngineConfig;
use crate::engine::ProtocolEngine;
use crate::error::Result;

/// Open a serial controller with default settings.
pub fn open_serial(path: impl AsRef<Path>) -> Result<ProtocolEngine<SerialTransport>> {
    open_serial_with_config(path, &SerialConfig::default(), EngineConfig::default())
}

/// Open a serial controller with explicit port and engine settings.
///
/// Buffers left over from whoever used the port last are flushed before
/// the engine is returned.
pub fn open_serial_with_config(
    path: impl AsRef<Path>,
    serial: &SerialConfig,
    config: EngineConfig,
) -> Result<ProtocolEngine<SerialTransport>> {
    let mut transport = SerialTransport::open(path, serial)?;
    transport.reset_and_flush_buffers()?;
    Ok(ProtocolEngine::with_config(transport, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommError;

    #[test]
    fn missing_port_reports_open_failure() {
        let err = open_serial("/dev/mrlink-does-not-exist").expect_err("open should fail");
        assert!(matches!(
            err,
            CommError::Transport(mrlink_transport::TransportError::Open { .. })
        ));
    }
}
