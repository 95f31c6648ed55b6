//! A simulated controller for tests, demos, and running without hardware.

use std::io;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use mrlink_datagram::{Datagram, Response, HEADER_SIZE, REQUEST_SYNC};
use mrlink_transport::{LinkControl, MarkedQueue, Transport, TransportError};
use tracing::{debug, warn};

/// Device id reported by [`PretendDevice::new`].
pub const PRETEND_DEVICE_ID: &str = "pretend";

/// Size of the simulated register file.
pub const REGISTER_COUNT: usize = 256;

#[derive(Debug, Default)]
struct Faults {
    drop_responses: usize,
    reject_requests: usize,
    garbage: Vec<u8>,
    corrupt_length: bool,
    truncate: usize,
}

/// An in-memory controller speaking the datagram protocol.
///
/// Each request written is answered immediately: reads return register
/// contents (addresses wrap at 256), writes update the registers and are
/// acknowledged. Every response starts a new packet, so packet-boundary
/// hints are exact. Reads never wait: if no response is queued they
/// report a timeout at once.
///
/// The fault knobs each affect the next response(s) only.
#[derive(Debug)]
pub struct PretendDevice {
    device_id: String,
    registers: [u8; REGISTER_COUNT],
    outbound: BytesMut,
    boundaries: MarkedQueue,
    faults: Faults,
    requests: u64,
    control: LinkControl,
}

impl PretendDevice {
    pub fn new() -> Self {
        Self::with_device_id(PRETEND_DEVICE_ID)
    }

    pub fn with_device_id(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            registers: [0; REGISTER_COUNT],
            outbound: BytesMut::new(),
            boundaries: MarkedQueue::new(),
            faults: Faults::default(),
            requests: 0,
            control: LinkControl::new(),
        }
    }

    pub fn registers(&self) -> &[u8; REGISTER_COUNT] {
        &self.registers
    }

    /// Preload registers starting at `address` (wrapping).
    pub fn set_registers(&mut self, address: u8, data: &[u8]) {
        for (offset, byte) in data.iter().enumerate() {
            self.registers[(usize::from(address) + offset) % REGISTER_COUNT] = *byte;
        }
    }

    /// Swallow the next `count` responses, so the host times out.
    pub fn drop_next_responses(&mut self, count: usize) {
        self.faults.drop_responses = count;
    }

    /// Answer the next `count` requests with the failure sentinel.
    pub fn reject_next_requests(&mut self, count: usize) {
        self.faults.reject_requests = count;
    }

    /// Send `garbage` as a packet of its own just before the next response.
    pub fn garbage_before_next_response(&mut self, garbage: &[u8]) {
        self.faults.garbage = garbage.to_vec();
    }

    /// Misstate the next response's payload length by one.
    pub fn corrupt_next_payload_length(&mut self) {
        self.faults.corrupt_length = true;
    }

    /// Cut the last `count` bytes off the next response.
    pub fn truncate_next_response(&mut self, count: usize) {
        self.faults.truncate = count;
    }

    /// Requests written so far, including malformed ones.
    pub fn requests_seen(&self) -> u64 {
        self.requests
    }

    /// Response bytes not yet read by the host.
    pub fn pending_bytes(&self) -> usize {
        self.outbound.len()
    }

    fn answer(&mut self, request: &[u8]) -> std::result::Result<Option<Datagram<Response>>, io::Error> {
        if request.len() < HEADER_SIZE || request[..2] != REQUEST_SYNC {
            warn!(
                device = %self.device_id,
                len = request.len(),
                "pretend device ignoring malformed request"
            );
            return Ok(None);
        }
        let function = request[2];
        let address = usize::from(request[3]);
        let length = usize::from(request[4]);
        let is_read = function & 0x80 != 0;

        if self.faults.reject_requests > 0 {
            self.faults.reject_requests -= 1;
            debug!(device = %self.device_id, "pretend device rejecting request");
            return Ok(Some(Datagram::failure()));
        }

        let invalid = |err| io::Error::new(io::ErrorKind::InvalidData, err);
        if is_read {
            let payload: Vec<u8> = (0..length)
                .map(|offset| self.registers[(address + offset) % REGISTER_COUNT])
                .collect();
            let mut response = Datagram::<Response>::new(length).map_err(invalid)?;
            response.set_read(function);
            response.set_address(address).map_err(invalid)?;
            response.set_payload(&payload).map_err(invalid)?;
            Ok(Some(response))
        } else {
            let Some(payload) = request.get(HEADER_SIZE..HEADER_SIZE + length) else {
                warn!(
                    device = %self.device_id,
                    len = request.len(),
                    declared = length,
                    "pretend device ignoring truncated write"
                );
                return Ok(None);
            };
            for (offset, byte) in payload.iter().enumerate() {
                self.registers[(address + offset) % REGISTER_COUNT] = *byte;
            }
            let mut response = Datagram::<Response>::new(0).map_err(invalid)?;
            response.set_write(function);
            response.set_address(address).map_err(invalid)?;
            Ok(Some(response))
        }
    }

    fn enqueue(&mut self, response: &Datagram<Response>) {
        if self.faults.drop_responses > 0 {
            self.faults.drop_responses -= 1;
            debug!(device = %self.device_id, "pretend device dropping response");
            return;
        }

        let garbage = std::mem::take(&mut self.faults.garbage);
        if !garbage.is_empty() {
            self.push_packet(&garbage);
        }

        let mut bytes = response.as_bytes().to_vec();
        if std::mem::take(&mut self.faults.corrupt_length) {
            bytes[4] = bytes[4].wrapping_add(1);
        }
        let truncate = std::mem::take(&mut self.faults.truncate);
        bytes.truncate(bytes.len().saturating_sub(truncate));
        self.push_packet(&bytes);
    }

    fn push_packet(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.outbound.extend_from_slice(bytes);
        self.boundaries.add_marked_item();
        self.boundaries.add_unmarked_items(bytes.len() - 1);
    }
}

impl Default for PretendDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for PretendDevice {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn write(&mut self, bytes: &[u8]) -> mrlink_transport::Result<()> {
        if !self.control.is_open() {
            return Err(TransportError::Closed);
        }
        self.requests += 1;
        if let Some(response) = self.answer(bytes)? {
            self.enqueue(&response);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> mrlink_transport::Result<usize> {
        if !self.control.is_open() {
            return Err(TransportError::Closed);
        }
        if self.control.is_read_interrupt_requested() {
            return Err(TransportError::Interrupted);
        }
        let count = buf.len().min(self.outbound.len());
        self.outbound.copy_to_slice(&mut buf[..count]);
        self.boundaries.remove_items(count);
        Ok(count)
    }

    fn might_be_at_packet_start(&self) -> bool {
        self.boundaries.is_empty() || self.boundaries.is_at_marked_item()
    }

    fn skip_to_likely_packet_start(&mut self) {
        let skipped = self.boundaries.remove_up_to_next_marked_item_or_end();
        if skipped > 0 {
            debug!(device = %self.device_id, skipped, "skipping to packet start");
        }
        self.outbound.advance(skipped);
    }

    fn reset_and_flush_buffers(&mut self) -> mrlink_transport::Result<()> {
        self.outbound.clear();
        self.boundaries.clear();
        Ok(())
    }

    fn control(&self) -> &LinkControl {
        &self.control
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(device: &mut PretendDevice) -> Vec<u8> {
        let mut buf = vec![0u8; device.pending_bytes()];
        let n = device
            .read(&mut buf, Duration::from_millis(10))
            .expect("read should succeed");
        buf.truncate(n);
        buf
    }

    #[test]
    fn answers_reads_from_registers() {
        let mut device = PretendDevice::new();
        device.set_registers(0x10, &[1, 2, 3]);
        device
            .write(&[0x55, 0xAA, 0x80, 0x10, 3])
            .expect("write should succeed");
        assert_eq!(read_all(&mut device), vec![0x33, 0xCC, 0x80, 0x10, 3, 1, 2, 3]);
    }

    #[test]
    fn applies_and_acknowledges_writes() {
        let mut device = PretendDevice::new();
        device
            .write(&[0x55, 0xAA, 0x00, 0xFF, 2, 9, 8])
            .expect("write should succeed");
        assert_eq!(read_all(&mut device), vec![0x33, 0xCC, 0x00, 0xFF, 0]);
        assert_eq!(device.registers()[0xFF], 9);
        assert_eq!(device.registers()[0x00], 8);
    }

    #[test]
    fn malformed_requests_get_no_answer() {
        let mut device = PretendDevice::new();
        device.write(&[0x33, 0xCC, 0x80, 0, 1]).expect("write should succeed");
        device.write(&[0x55, 0xAA, 0x00, 0, 4, 1]).expect("write should succeed");
        assert_eq!(device.pending_bytes(), 0);
        assert_eq!(device.requests_seen(), 2);
    }

    #[test]
    fn rejection_sends_failure_sentinel() {
        let mut device = PretendDevice::new();
        device.reject_next_requests(1);
        device
            .write(&[0x55, 0xAA, 0x80, 0x10, 3])
            .expect("write should succeed");
        assert_eq!(read_all(&mut device), vec![0x33, 0xCC, 0xFF, 0xFF, 0]);
    }

    #[test]
    fn garbage_is_a_separate_packet() {
        let mut device = PretendDevice::new();
        device.garbage_before_next_response(&[0xDE, 0xAD]);
        device
            .write(&[0x55, 0xAA, 0x80, 0x00, 0])
            .expect("write should succeed");

        assert!(device.might_be_at_packet_start());
        let mut byte = [0u8; 1];
        device
            .read(&mut byte, Duration::ZERO)
            .expect("read should succeed");
        assert_eq!(byte, [0xDE]);
        assert!(!device.might_be_at_packet_start());

        device.skip_to_likely_packet_start();
        assert!(device.might_be_at_packet_start());
        assert_eq!(read_all(&mut device), vec![0x33, 0xCC, 0x80, 0x00, 0]);
    }

    #[test]
    fn dropped_response_reads_nothing() {
        let mut device = PretendDevice::new();
        device.drop_next_responses(1);
        device
            .write(&[0x55, 0xAA, 0x80, 0x00, 1])
            .expect("write should succeed");
        let mut buf = [0u8; 5];
        assert_eq!(
            device
                .read(&mut buf, Duration::from_millis(50))
                .expect("read should succeed"),
            0
        );
    }

    #[test]
    fn closed_device_refuses_io() {
        let mut device = PretendDevice::new();
        device.close();
        assert!(matches!(
            device.write(&[0x55, 0xAA, 0x80, 0x00, 1]),
            Err(TransportError::Closed)
        ));
        let mut buf = [0u8; 1];
        assert!(matches!(
            device.read(&mut buf, Duration::ZERO),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn interrupt_request_aborts_read() {
        let mut device = PretendDevice::new();
        device.request_read_interrupt(true);
        let mut buf = [0u8; 1];
        assert!(matches!(
            device.read(&mut buf, Duration::ZERO),
            Err(TransportError::Interrupted)
        ));
    }
}
