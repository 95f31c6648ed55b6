use std::fmt;
use std::marker::PhantomData;

use crate::error::{DatagramError, Result};

/// Header: sync0 (1) + sync1 (1) + function (1) + address (1) + length (1) = 5 bytes.
pub const HEADER_SIZE: usize = 5;

pub const IB_SYNC_0: usize = 0;
pub const IB_SYNC_1: usize = 1;
pub const IB_FUNCTION: usize = 2;
pub const IB_ADDRESS: usize = 3;
pub const IB_LENGTH: usize = 4;

/// Largest payload a single datagram can carry.
pub const MAX_PAYLOAD: usize = 255;

/// Sync markers that open every request (host to controller).
pub const REQUEST_SYNC: [u8; 2] = [0x55, 0xAA];

/// Sync markers that open every response (controller to host).
pub const RESPONSE_SYNC: [u8; 2] = [0x33, 0xCC];

const READ_BIT: u8 = 0x80;
const FUNCTION_MASK: u8 = 0x7F;
const FAILURE_MARKER: u8 = 0xFF;

/// The direction a datagram travels, which fixes its sync markers.
pub trait Role: Send + Sync + 'static {
    /// Sync markers at offsets 0 and 1.
    const SYNC: [u8; 2];
    /// Name used in diagnostics.
    const NAME: &'static str;
}

/// Host-to-controller role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request;

/// Controller-to-host role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response;

impl Role for Request {
    const SYNC: [u8; 2] = REQUEST_SYNC;
    const NAME: &'static str = "request";
}

impl Role for Response {
    const SYNC: [u8; 2] = RESPONSE_SYNC;
    const NAME: &'static str = "response";
}

/// One framed unit of the wire protocol.
///
/// Wire format:
/// ```text
/// ┌────────┬────────┬──────────────────┬─────────┬────────┬──────────────┐
/// │ sync0  │ sync1  │ function         │ address │ length │ payload      │
/// │ (1B)   │ (1B)   │ bit7=read, 0-6=fn│ (1B)    │ (1B)   │ (length B)   │
/// └────────┴────────┴──────────────────┴─────────┴────────┴──────────────┘
/// ```
///
/// The payload capacity is fixed when the buffer is allocated. A read
/// request carries a length but no payload, so its declared length may
/// exceed its capacity; [`payload`](Self::payload) only ever exposes the
/// bytes actually allocated.
#[derive(Clone, PartialEq, Eq)]
pub struct Datagram<R: Role> {
    data: Box<[u8]>,
    role: PhantomData<R>,
}

impl<R: Role> Datagram<R> {
    /// Allocate a datagram with room for `payload_alloc` payload bytes.
    ///
    /// Sync markers are set and function/address/length are zero.
    pub fn new(payload_alloc: usize) -> Result<Self> {
        if payload_alloc > MAX_PAYLOAD {
            return Err(DatagramError::LengthOutOfRange(payload_alloc));
        }
        let mut datagram = Self {
            data: vec![0u8; HEADER_SIZE + payload_alloc].into_boxed_slice(),
            role: PhantomData,
        };
        datagram.reset_header();
        Ok(datagram)
    }

    /// The failure sentinel: function and address both `0xFF`, no payload.
    pub fn failure() -> Self {
        let mut datagram = Self {
            data: vec![0u8; HEADER_SIZE].into_boxed_slice(),
            role: PhantomData,
        };
        datagram.reset_header();
        datagram.data[IB_FUNCTION] = FAILURE_MARKER;
        datagram.data[IB_ADDRESS] = FAILURE_MARKER;
        datagram
    }

    /// Decode a complete datagram from its wire image.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(DatagramError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        let actual = [bytes[IB_SYNC_0], bytes[IB_SYNC_1]];
        if actual != R::SYNC {
            return Err(DatagramError::InvalidSync {
                expected: R::SYNC,
                actual,
            });
        }
        let expected = HEADER_SIZE + bytes[IB_LENGTH] as usize;
        if bytes.len() != expected {
            return Err(DatagramError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            data: bytes.to_vec().into_boxed_slice(),
            role: PhantomData,
        })
    }

    /// Restore the sync markers and zero function/address/length.
    ///
    /// Payload bytes are left as they were.
    pub fn reset_header(&mut self) {
        self.data[IB_SYNC_0] = R::SYNC[0];
        self.data[IB_SYNC_1] = R::SYNC[1];
        self.data[IB_FUNCTION] = 0;
        self.data[IB_ADDRESS] = 0;
        self.data[IB_LENGTH] = 0;
    }

    /// Zero the payload region.
    pub fn clear_payload(&mut self) {
        self.data[HEADER_SIZE..].fill(0);
    }

    /// The full buffer: header plus allocated payload. This is what goes on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the full buffer, for filling it from a transport.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn header(&self) -> &[u8] {
        &self.data[..HEADER_SIZE]
    }

    /// Copy the 5 header bytes of `other` (of any role) into this datagram.
    pub fn copy_header_from<S: Role>(&mut self, other: &Datagram<S>) {
        self.data[..HEADER_SIZE].copy_from_slice(other.header());
    }

    /// Payload capacity fixed at allocation.
    pub fn allocated_payload(&self) -> usize {
        self.data.len() - HEADER_SIZE
    }

    pub fn is_read(&self) -> bool {
        self.data[IB_FUNCTION] & READ_BIT != 0
    }

    pub fn is_write(&self) -> bool {
        !self.is_read()
    }

    /// Mark as a read of `function` (low 7 bits used).
    pub fn set_read(&mut self, function: u8) {
        self.data[IB_FUNCTION] = READ_BIT | (function & FUNCTION_MASK);
    }

    /// Mark as a write of `function` (low 7 bits used).
    pub fn set_write(&mut self, function: u8) {
        self.data[IB_FUNCTION] = function & FUNCTION_MASK;
    }

    pub fn function(&self) -> u8 {
        self.data[IB_FUNCTION] & FUNCTION_MASK
    }

    /// Change the function code, keeping the direction bit.
    pub fn set_function(&mut self, function: u8) {
        self.data[IB_FUNCTION] = (self.data[IB_FUNCTION] & READ_BIT) | (function & FUNCTION_MASK);
    }

    pub fn address(&self) -> u8 {
        self.data[IB_ADDRESS]
    }

    pub fn set_address(&mut self, address: usize) -> Result<()> {
        let address = u8::try_from(address).map_err(|_| DatagramError::AddressOutOfRange(address))?;
        self.data[IB_ADDRESS] = address;
        Ok(())
    }

    /// Declared payload length from the header.
    pub fn payload_length(&self) -> usize {
        self.data[IB_LENGTH] as usize
    }

    /// Set the declared payload length. May exceed the allocation (read requests).
    pub fn set_payload_length(&mut self, length: usize) -> Result<()> {
        let length = u8::try_from(length).map_err(|_| DatagramError::LengthOutOfRange(length))?;
        self.data[IB_LENGTH] = length;
        Ok(())
    }

    /// Set the length and copy `payload` in after the header.
    pub fn set_payload(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.allocated_payload() {
            return Err(DatagramError::PayloadExceedsAllocation {
                len: payload.len(),
                allocated: self.allocated_payload(),
            });
        }
        self.set_payload_length(payload.len())?;
        self.data[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
        Ok(())
    }

    /// The payload bytes present in this buffer.
    pub fn payload(&self) -> &[u8] {
        let len = self.payload_length().min(self.allocated_payload());
        &self.data[HEADER_SIZE..HEADER_SIZE + len]
    }

    /// The sentinel the controller sends when it rejects a request.
    pub fn is_failure(&self) -> bool {
        self.data[IB_FUNCTION] == FAILURE_MARKER && self.data[IB_ADDRESS] == FAILURE_MARKER
    }

    /// Whether offsets 0 and 1 hold this role's sync markers.
    pub fn sync_bytes_valid(&self) -> bool {
        self.data[IB_SYNC_0] == R::SYNC[0] && self.data[IB_SYNC_1] == R::SYNC[1]
    }
}

impl<R: Role> fmt::Debug for Datagram<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Payload contents are never printed.
        f.debug_struct("Datagram")
            .field("role", &R::NAME)
            .field("read", &self.is_read())
            .field("function", &self.function())
            .field("address", &self.address())
            .field("length", &self.payload_length())
            .field("allocated", &self.allocated_payload())
            .finish()
    }
}
