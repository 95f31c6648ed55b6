//! Response framing: finding, validating, and reading a response datagram
//! from the byte stream.
//!
//! While synchronized, the next 5 bytes are trusted to be a response header.
//! Otherwise the stream is scanned for the response sync markers, skipping
//! to likely packet boundaries, until a header is found or the resync window
//! closes.

use std::time::Duration;

use mrlink_datagram::{Datagram, Pooled, Request, Response, HEADER_SIZE, RESPONSE_SYNC};
use mrlink_transport::Transport;
use serde::Serialize;
use tracing::trace;

use crate::clock::Clock;
use crate::engine::ProtocolEngine;
use crate::error::{CommKind, Result};

/// Whether the engine trusts the byte stream to be aligned on a response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Unsynchronized,
    Synchronized,
}

impl<T: Transport, C: Clock> ProtocolEngine<T, C> {
    /// Read and validate the response to `request`.
    pub(crate) fn read_response(&mut self, request: &Datagram<Request>) -> Result<Pooled<Response>> {
        let request_response = self.config.timing.request_response();
        let window = self.config.timing.resync;
        let deadline = self.clock.now() + window;

        while self.clock.now() < deadline {
            // Sync markers only ever start a packet.
            if !self.transport.might_be_at_packet_start() {
                self.sync = SyncState::Unsynchronized;
            }

            let mut header = self.response_pool.alloc_scoped(0)?;
            match self.sync {
                SyncState::Unsynchronized => {
                    self.transport.skip_to_likely_packet_start();
                    let sync0 = self.read_single_byte(request_response, "sync0", request)?;
                    if sync0 != RESPONSE_SYNC[0] {
                        trace!(byte = sync0, "skipping non-sync byte");
                        continue;
                    }
                    if self.read_single_byte(Duration::ZERO, "sync1", request)? != RESPONSE_SYNC[1] {
                        continue;
                    }
                    let bytes = header.as_bytes_mut();
                    bytes[..2].copy_from_slice(&RESPONSE_SYNC);
                    self.read_incoming_bytes(&mut bytes[2..], request_response, "sync suffix", request)?;
                }
                SyncState::Synchronized => {
                    self.read_incoming_bytes(header.as_bytes_mut(), request_response, "header", request)?;
                    if !header.sync_bytes_valid() {
                        // Bytes arrived but not a header: the response we want is gone.
                        return Err(self.protocol_error(CommKind::SyncLost, request, Some(&*header)));
                    }
                }
            }

            if !header.is_failure()
                && (request.is_read() != header.is_read() || request.function() != header.function())
            {
                let kind = CommKind::type_error(request.is_write());
                return Err(self.protocol_error(kind, request, Some(&*header)));
            }

            let expected = if header.is_failure() || request.is_write() {
                0
            } else {
                request.payload_length()
            };
            if header.payload_length() != expected {
                let kind = CommKind::payload_error(request.is_write());
                return Err(self.protocol_error(kind, request, Some(&*header)));
            }

            let mut response = self.response_pool.alloc_scoped(header.payload_length())?;
            response.copy_header_from(&*header);
            drop(header);
            self.read_incoming_bytes(
                &mut response.as_bytes_mut()[HEADER_SIZE..],
                Duration::ZERO,
                "payload",
                request,
            )?;

            self.sync = SyncState::Synchronized;
            return Ok(response);
        }

        let detail = format!("timeout waiting {} ms for response", window.as_millis());
        Err(self.timeout_error(request, detail))
    }

    /// Fill `buf` from the transport within the payload timeout for its length.
    ///
    /// Nothing at all is a timeout; a partial fill is a short read.
    pub(crate) fn read_incoming_bytes(
        &mut self,
        buf: &mut [u8],
        extra: Duration,
        what: &'static str,
        request: &Datagram<Request>,
    ) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let timeout = self.config.timing.payload_timeout(buf.len(), extra);
        let read = self.transport.read(buf, timeout)?;
        if read == buf.len() {
            Ok(())
        } else if read == 0 {
            let detail = format!(
                "{what}: unable to read {} bytes in {} ms",
                buf.len(),
                timeout.as_millis()
            );
            Err(self.timeout_error(request, detail))
        } else {
            Err(self.short_read(what, buf.len(), read, request))
        }
    }

    pub(crate) fn read_single_byte(
        &mut self,
        extra: Duration,
        what: &'static str,
        request: &Datagram<Request>,
    ) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_incoming_bytes(&mut byte, extra, what, request)?;
        Ok(byte[0])
    }
}
