use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Open and read-interrupt flags shared between a transport and the threads
/// that may need to stop it.
///
/// Cloning is cheap; all clones observe the same flags. A teardown path holds
/// a clone while the polling thread owns the transport itself.
#[derive(Clone, Debug)]
pub struct LinkControl {
    inner: Arc<LinkFlags>,
}

#[derive(Debug)]
struct LinkFlags {
    open: AtomicBool,
    interrupt: AtomicBool,
}

impl LinkControl {
    /// Create flags for a freshly opened link.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LinkFlags {
                open: AtomicBool::new(true),
                interrupt: AtomicBool::new(false),
            }),
        }
    }

    /// Whether the link is still open.
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Mark the link closed. Reads in progress notice at their next poll.
    pub fn close(&self) {
        self.inner.open.store(false, Ordering::SeqCst);
    }

    /// Ask any blocked read to return early (or stop asking).
    pub fn request_read_interrupt(&self, requested: bool) {
        self.inner.interrupt.store(requested, Ordering::SeqCst);
    }

    /// Whether a read interrupt is currently requested.
    pub fn is_read_interrupt_requested(&self) -> bool {
        self.inner.interrupt.load(Ordering::SeqCst)
    }
}

impl Default for LinkControl {
    fn default() -> Self {
        Self::new()
    }
}

/// A byte-oriented link to a peripheral controller.
///
/// Writes block until the bytes are handed to the device. Reads block for at
/// most `timeout` and return how many bytes were placed at the start of
/// `buf`; `0` means nothing usable arrived in time. Implementations may keep
/// bytes from a read that timed out and serve them to the next read.
pub trait Transport {
    /// Identifier used in logs and errors (serial number, port path, ...).
    fn device_id(&self) -> &str;

    /// Transmit `bytes` in full.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout`.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Hint: `false` if the next byte is known not to start a packet.
    fn might_be_at_packet_start(&self) -> bool;

    /// Discard buffered bytes up to the next likely packet start.
    fn skip_to_likely_packet_start(&mut self);

    /// Drop everything buffered in either direction.
    fn reset_and_flush_buffers(&mut self) -> Result<()>;

    /// Shared open/interrupt flags for this link.
    fn control(&self) -> &LinkControl;

    /// Whether the link is still open.
    fn is_open(&self) -> bool {
        self.control().is_open()
    }

    /// Ask a blocked read to return early.
    fn request_read_interrupt(&self, requested: bool) {
        self.control().request_read_interrupt(requested);
    }

    /// Close the link.
    fn close(&mut self) {
        self.control().close();
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn device_id(&self) -> &str {
        (**self).device_id()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read(buf, timeout)
    }

    fn might_be_at_packet_start(&self) -> bool {
        (**self).might_be_at_packet_start()
    }

    fn skip_to_likely_packet_start(&mut self) {
        (**self).skip_to_likely_packet_start();
    }

    fn reset_and_flush_buffers(&mut self) -> Result<()> {
        (**self).reset_and_flush_buffers()
    }

    fn control(&self) -> &LinkControl {
        (**self).control()
    }

    fn close(&mut self) {
        (**self).close();
    }
}

impl std::fmt::Debug for dyn Transport + Send {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("device_id", &self.device_id())
            .field("open", &self.is_open())
            .finish()
    }
}
