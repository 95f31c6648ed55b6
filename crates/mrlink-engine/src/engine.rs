use std::sync::Arc;

use mrlink_datagram::{hex_dump, AllocationPool, Datagram, Pooled, Request, Response};
use mrlink_transport::{LinkControl, Transport};
use tracing::{debug, error, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{CommContext, CommError, CommKind, Result};
use crate::sync::SyncState;

/// How a `read` or `write` call ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Disposition {
    /// The exchange succeeded.
    Completed,
    /// The link closed while the exchange was failing; nothing was transferred.
    DeviceClosed,
    /// A non-retrying read failed; the caller's buffer is unchanged.
    Ignored,
}

/// Request/response engine for one controller.
///
/// Owns the transport and exchanges one datagram pair per attempt, retrying
/// failed attempts and resynchronizing the byte stream as needed. Blocking;
/// use from one thread at a time.
pub struct ProtocolEngine<T, C = SystemClock> {
    pub(crate) transport: T,
    pub(crate) clock: C,
    pub(crate) config: EngineConfig,
    pub(crate) request_pool: Arc<AllocationPool<Request>>,
    pub(crate) response_pool: Arc<AllocationPool<Response>>,
    pub(crate) sync: SyncState,
    read_errors: u32,
    write_errors: u32,
}

impl<T: Transport> ProtocolEngine<T, SystemClock> {
    /// Create an engine with default configuration.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, EngineConfig::default())
    }

    /// Create an engine with explicit configuration.
    pub fn with_config(transport: T, config: EngineConfig) -> Self {
        Self {
            transport,
            clock: SystemClock,
            config,
            request_pool: Arc::new(AllocationPool::new()),
            response_pool: Arc::new(AllocationPool::new()),
            sync: SyncState::Unsynchronized,
            read_errors: 0,
            write_errors: 0,
        }
    }
}

impl<T: Transport, C: Clock> ProtocolEngine<T, C> {
    /// Replace the time source.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> ProtocolEngine<T, C2> {
        ProtocolEngine {
            transport: self.transport,
            clock,
            config: self.config,
            request_pool: self.request_pool,
            response_pool: self.response_pool,
            sync: self.sync,
            read_errors: self.read_errors,
            write_errors: self.write_errors,
        }
    }

    /// Use caller-owned buffer pools.
    pub fn with_pools(
        mut self,
        requests: Arc<AllocationPool<Request>>,
        responses: Arc<AllocationPool<Response>>,
    ) -> Self {
        self.request_pool = requests;
        self.response_pool = responses;
        self
    }

    /// Read `buffer.len()` bytes starting at `address`.
    ///
    /// Failed attempts are retried up to `read_retry_count` times. With
    /// `retry == false` the first failure is logged and reported as
    /// [`Disposition::Ignored`] instead.
    pub fn read(&mut self, address: usize, buffer: &mut [u8], retry: bool) -> Result<Disposition> {
        self.check_sequential_errors()?;
        debug!(
            device = self.transport.device_id(),
            address,
            length = buffer.len(),
            "read"
        );

        let attempts = self.config.read_retry_count.max(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                warn!(
                    device = self.transport.device_id(),
                    attempt,
                    address,
                    length = buffer.len(),
                    "retrying read"
                );
            }
            let err = match self.read_once(address, buffer) {
                Ok(()) => return Ok(Disposition::Completed),
                Err(err) => err,
            };
            if !self.transport.is_open() {
                debug!(device = self.transport.device_id(), "device closed during read");
                return Ok(Disposition::DeviceClosed);
            }
            if !err.is_retryable() {
                return Err(err);
            }
            if !retry {
                warn!(
                    device = self.transport.device_id(),
                    address,
                    length = buffer.len(),
                    error = %err,
                    "ignoring failed read"
                );
                return Ok(Disposition::Ignored);
            }
            // Give the controller time to finish writing before flushing.
            self.clock.sleep(self.config.read_retry_interval);
            self.transport.reset_and_flush_buffers()?;
            last_error = Some(err);
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(Disposition::Completed),
        }
    }

    /// Write `data` starting at `address`, retrying failed attempts up to
    /// `write_retry_count` times.
    ///
    /// Writes are assumed idempotent: an attempt that appears to fail may
    /// still have reached the controller.
    pub fn write(&mut self, address: usize, data: &[u8]) -> Result<Disposition> {
        self.check_sequential_errors()?;
        debug!(
            device = self.transport.device_id(),
            address,
            length = data.len(),
            "write"
        );

        let attempts = self.config.write_retry_count.max(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                warn!(
                    device = self.transport.device_id(),
                    attempt,
                    address,
                    length = data.len(),
                    "retrying write"
                );
            }
            let err = match self.write_once(address, data) {
                Ok(()) => return Ok(Disposition::Completed),
                Err(err) => err,
            };
            if !self.transport.is_open() {
                debug!(device = self.transport.device_id(), "device closed during write");
                return Ok(Disposition::DeviceClosed);
            }
            if !err.is_retryable() {
                return Err(err);
            }
            self.clock.sleep(self.config.write_retry_interval);
            self.transport.reset_and_flush_buffers()?;
            last_error = Some(err);
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(Disposition::Completed),
        }
    }

    /// One read exchange, no retries.
    pub fn read_once(&mut self, address: usize, buffer: &mut [u8]) -> Result<()> {
        let result = self.exchange_read(address, buffer);
        match &result {
            Ok(()) => self.read_errors = 0,
            Err(err) if err.counts_toward_breaker() => self.read_errors += 1,
            Err(_) => {}
        }
        result
    }

    /// One write exchange, no retries.
    pub fn write_once(&mut self, address: usize, data: &[u8]) -> Result<()> {
        let result = self.exchange_write(address, data);
        match &result {
            Ok(()) => self.write_errors = 0,
            Err(err) if err.counts_toward_breaker() => self.write_errors += 1,
            Err(_) => {}
        }
        result
    }

    fn exchange_read(&mut self, address: usize, buffer: &mut [u8]) -> Result<()> {
        let mut request = self.request_pool.alloc_scoped(0)?;
        request.set_read(0);
        request.set_address(address)?;
        request.set_payload_length(buffer.len())?;
        self.transport.write(request.as_bytes())?;

        let response = self.await_response(&request)?;
        if response.is_failure() {
            self.clock.sleep(self.config.timing.failure_wait);
            return Err(self.protocol_error(CommKind::failure(false), &request, Some(&*response)));
        }
        if response.is_read()
            && response.function() == 0
            && usize::from(response.address()) == address
            && response.payload_length() == buffer.len()
        {
            buffer.copy_from_slice(response.payload());
            return Ok(());
        }
        self.clock.sleep(self.config.timing.comm_error_wait);
        Err(self.protocol_error(CommKind::error(false), &request, Some(&*response)))
    }

    fn exchange_write(&mut self, address: usize, data: &[u8]) -> Result<()> {
        let mut request = self.request_pool.alloc_scoped(data.len())?;
        request.set_write(0);
        request.set_address(address)?;
        request.set_payload(data)?;
        self.transport.write(request.as_bytes())?;

        let response = self.await_response(&request)?;
        if response.is_failure() {
            self.clock.sleep(self.config.timing.failure_wait);
            return Err(self.protocol_error(CommKind::failure(true), &request, Some(&*response)));
        }
        if response.is_write()
            && response.function() == 0
            && usize::from(response.address()) == address
            && response.payload_length() == 0
        {
            return Ok(());
        }
        self.clock.sleep(self.config.timing.comm_error_wait);
        Err(self.protocol_error(CommKind::error(true), &request, Some(&*response)))
    }

    /// Read the response to `request`; timeouts incur the comm-error settle delay.
    fn await_response(
        &mut self,
        request: &Datagram<Request>,
    ) -> Result<Pooled<Response>> {
        match self.read_response(request) {
            Err(err) if err.is_timeout() => {
                self.clock.sleep(self.config.timing.comm_error_wait);
                Err(err)
            }
            other => other,
        }
    }

    /// Fail with [`CommError::TooManySequentialErrors`] if the link is open
    /// and either direction has failed more than `max_sequential_errors`
    /// times in a row.
    pub fn check_sequential_errors(&self) -> Result<()> {
        let limit = self.config.max_sequential_errors;
        if self.transport.is_open() && (self.read_errors > limit || self.write_errors > limit) {
            error!(
                device = self.transport.device_id(),
                read_errors = self.read_errors,
                write_errors = self.write_errors,
                "too many sequential comm errors"
            );
            return Err(CommError::TooManySequentialErrors {
                device: self.transport.device_id().to_string(),
            });
        }
        Ok(())
    }

    /// Consecutive failed read attempts.
    pub fn read_error_count(&self) -> u32 {
        self.read_errors
    }

    /// Consecutive failed write attempts.
    pub fn write_error_count(&self) -> u32 {
        self.write_errors
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn request_pool(&self) -> &Arc<AllocationPool<Request>> {
        &self.request_pool
    }

    pub fn response_pool(&self) -> &Arc<AllocationPool<Response>> {
        &self.response_pool
    }

    pub fn device_id(&self) -> &str {
        self.transport.device_id()
    }

    /// A handle for closing or interrupting the link from another thread.
    pub fn control(&self) -> LinkControl {
        self.transport.control().clone()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Close the link.
    pub fn close(&mut self) {
        self.transport.close();
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    pub(crate) fn context(
        &self,
        request: &Datagram<Request>,
        response: Option<&Datagram<Response>>,
    ) -> CommContext {
        CommContext {
            device: self.transport.device_id().to_string(),
            address: request.address(),
            length: request.payload_length(),
            request: hex_dump(request.header()),
            response: response.map(|response| hex_dump(response.header())),
        }
    }

    /// Log a protocol error, drop synchronization, and build the error.
    pub(crate) fn protocol_error(
        &mut self,
        kind: CommKind,
        request: &Datagram<Request>,
        response: Option<&Datagram<Response>>,
    ) -> CommError {
        let context = self.context(request, response);
        error!(
            device = %context.device,
            address = context.address,
            length = context.length,
            request = %context.request,
            response = context.response.as_deref().unwrap_or("-"),
            "{kind}"
        );
        self.sync = SyncState::Unsynchronized;
        CommError::Protocol {
            kind,
            context: Box::new(context),
        }
    }

    /// Log a timeout, drop synchronization, and build the error.
    pub(crate) fn timeout_error(&mut self, request: &Datagram<Request>, detail: String) -> CommError {
        let kind = CommKind::timeout(request.is_write());
        let context = self.context(request, None);
        error!(
            device = %context.device,
            address = context.address,
            length = context.length,
            request = %context.request,
            detail = %detail,
            "{kind}"
        );
        self.sync = SyncState::Unsynchronized;
        CommError::Timeout {
            kind,
            context: Box::new(context),
            detail,
        }
    }

    /// Log a partial read, drop synchronization, and build the error.
    pub(crate) fn short_read(
        &mut self,
        what: &'static str,
        expected: usize,
        actual: usize,
        request: &Datagram<Request>,
    ) -> CommError {
        let context = self.context(request, None);
        error!(
            device = %context.device,
            address = context.address,
            length = context.length,
            request = %context.request,
            what,
            expected,
            actual,
            "short read"
        );
        self.sync = SyncState::Unsynchronized;
        CommError::ShortRead {
            what,
            expected,
            actual,
            context: Box::new(context),
        }
    }
}

impl<T: Transport, C> std::fmt::Debug for ProtocolEngine<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("device_id", &self.transport.device_id())
            .field("sync", &self.sync)
            .field("read_errors", &self.read_errors)
            .field("write_errors", &self.write_errors)
            .finish()
    }
}
