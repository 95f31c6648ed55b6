//! Serial (tty / USB CDC) transport.
//!
//! Opens a port with the `serialport` crate and layers the
//! [`Transport`](crate::Transport) read semantics on top: reads poll the port
//! until the requested count arrives or the deadline passes, and bytes
//! collected by a read that times out are retained for the next read.

use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{LinkControl, Transport};

/// Baud rate spoken by the controllers this crate targets.
pub const DEFAULT_BAUD_RATE: u32 = 250_000;

const READ_AHEAD_CAPACITY: usize = 512;

/// Configuration for opening a serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Line speed. Default: 250000.
    pub baud_rate: u32,
    /// Port-level timeout for each underlying read; bounds how quickly a
    /// close or read interrupt is noticed. Default: 5ms.
    pub poll_interval: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            poll_interval: Duration::from_millis(5),
        }
    }
}

/// The operations a serial transport needs from its port.
pub trait PortIo: Read + Write + Send {
    /// Discard bytes buffered by the driver in both directions.
    fn clear_all(&mut self) -> io::Result<()>;
}

impl PortIo for Box<dyn SerialPort> {
    fn clear_all(&mut self) -> io::Result<()> {
        self.clear(serialport::ClearBuffer::All)
            .map_err(io::Error::other)
    }
}

/// A [`Transport`] over a serial port.
///
/// A plain tty carries no USB packet boundaries, so this transport always
/// reports that it might be at a packet start and cannot skip ahead.
pub struct SerialTransport<P = Box<dyn SerialPort>> {
    port: P,
    device_id: String,
    read_ahead: BytesMut,
    control: LinkControl,
}

impl SerialTransport<Box<dyn SerialPort>> {
    /// Open `path` as 8N1 with no flow control.
    pub fn open(path: impl AsRef<Path>, config: &SerialConfig) -> Result<Self> {
        let path = path.as_ref();
        let name = path.to_string_lossy().into_owned();
        let port = serialport::new(&name, config.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(config.poll_interval)
            .open()
            .map_err(|source| TransportError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        info!(port = %name, baud = config.baud_rate, "opened serial port");
        Ok(Self::from_port(port, name))
    }
}

impl<P: PortIo> SerialTransport<P> {
    /// Wrap an already-open port.
    pub fn from_port(port: P, device_id: impl Into<String>) -> Self {
        Self {
            port,
            device_id: device_id.into(),
            read_ahead: BytesMut::with_capacity(READ_AHEAD_CAPACITY),
            control: LinkControl::new(),
        }
    }

    /// Bytes held over from reads that timed out.
    pub fn read_ahead_len(&self) -> usize {
        self.read_ahead.len()
    }

    /// Borrow the underlying port.
    pub fn get_ref(&self) -> &P {
        &self.port
    }

    /// Mutably borrow the underlying port.
    pub fn get_mut(&mut self) -> &mut P {
        &mut self.port
    }

    fn stash(&mut self, bytes: &[u8]) {
        self.read_ahead.extend_from_slice(bytes);
    }
}

impl<P: PortIo> Transport for SerialTransport<P> {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.control.is_open() {
            return Err(TransportError::Closed);
        }
        loop {
            match self.port.write_all(bytes) {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let deadline = Instant::now() + timeout;
        let mut filled = self.read_ahead.len().min(buf.len());
        buf[..filled].copy_from_slice(&self.read_ahead[..filled]);
        self.read_ahead.advance(filled);

        while filled < buf.len() {
            if !self.control.is_open() {
                return Err(TransportError::Closed);
            }
            if self.control.is_read_interrupt_requested() {
                self.stash(&buf[..filled]);
                return Err(TransportError::Interrupted);
            }

            match self.port.read(&mut buf[filled..]) {
                Ok(n) => filled += n,
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(err) => {
                    self.stash(&buf[..filled]);
                    return Err(TransportError::Io(err));
                }
            }

            if filled < buf.len() && Instant::now() >= deadline {
                break;
            }
        }

        if filled == buf.len() {
            return Ok(filled);
        }

        warn!(
            device = %self.device_id,
            wanted = buf.len(),
            got = filled,
            timeout_ms = timeout.as_millis() as u64,
            "didn't read enough data"
        );
        self.stash(&buf[..filled]);
        Ok(0)
    }

    fn might_be_at_packet_start(&self) -> bool {
        true
    }

    fn skip_to_likely_packet_start(&mut self) {}

    fn reset_and_flush_buffers(&mut self) -> Result<()> {
        debug!(device = %self.device_id, dropped = self.read_ahead.len(), "flushing serial buffers");
        self.read_ahead.clear();
        self.port.clear_all()?;
        Ok(())
    }

    fn control(&self) -> &LinkControl {
        &self.control
    }
}

/// Information about an available serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// USB vendor ID (if USB device).
    pub vid: Option<u16>,
    /// USB product ID (if USB device).
    pub pid: Option<u16>,
    /// Manufacturer name (if available).
    pub manufacturer: Option<String>,
    /// Product name (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product, serial_number) = match info.port_type {
            SerialPortType::UsbPort(usb) => (
                Some(usb.vid),
                Some(usb.pid),
                usb.manufacturer,
                usb.product,
                usb.serial_number,
            ),
            _ => (None, None, None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            manufacturer,
            product,
            serial_number,
        }
    }
}

/// ttyACM* first, then ttyUSB* (each numerically), then everything else by name.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        return (0, rest.parse().unwrap_or(usize::MAX), basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        return (1, rest.parse().unwrap_or(usize::MAX), basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List available serial ports in a deterministic order.
pub fn list_ports() -> Vec<PortInfo> {
    let mut by_name: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let port = PortInfo::from(info);
        by_name.entry(port.name.clone()).or_insert(port);
    }

    let mut ports: Vec<PortInfo> = by_name.into_values().collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}
