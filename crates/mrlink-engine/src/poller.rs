//! A dedicated thread that keeps one controller's register window fresh.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mrlink_transport::{LinkControl, Transport, TransportError};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::engine::{Disposition, ProtocolEngine};
use crate::error::{CommError, Result};
use crate::sync::SyncState;

/// Why a poll loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Closed on request, or the cycle limit was reached.
    Normal,
    /// The link failed in a way reopening will not fix.
    Abnormal,
    /// The controller stopped answering; reopening the link may recover it.
    AbnormalAttemptReopen,
}

/// How a poll loop ended.
#[derive(Debug)]
pub struct PollExit {
    pub reason: ShutdownReason,
    /// The error that ended the loop, if one did.
    pub error: Option<CommError>,
    /// Completed cycles.
    pub cycles: u64,
}

/// What to poll and how often.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// First register of the monitored window.
    pub address: usize,
    /// Window length in bytes.
    pub length: usize,
    /// Pause between cycles. Default: 10ms.
    pub interval: Duration,
    /// Stop normally after this many cycles.
    pub max_cycles: Option<u64>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            address: 0,
            length: 16,
            interval: Duration::from_millis(10),
            max_cycles: None,
        }
    }
}

/// State published after each poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Completed cycles.
    pub cycle: u64,
    pub address: usize,
    /// Latest successfully read window contents.
    pub data: Vec<u8>,
    /// Cycles whose read failed and was skipped.
    pub ignored_reads: u64,
    pub read_errors: u32,
    pub write_errors: u32,
    pub sync: SyncState,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<PollState>,
    changed: Condvar,
    writes: Mutex<VecDeque<(usize, Vec<u8>)>>,
}

#[derive(Debug)]
struct PollState {
    snapshot: Snapshot,
    finished: Option<ShutdownReason>,
}

/// Handle to a running poll loop.
///
/// Dropping the handle closes the loop.
#[derive(Debug)]
pub struct Poller {
    device_id: String,
    control: LinkControl,
    running: Arc<AtomicBool>,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<PollExit>>,
}

impl Poller {
    /// Start polling on a new thread. The engine's link is closed when the loop ends.
    pub fn spawn<T, C>(engine: ProtocolEngine<T, C>, config: PollerConfig) -> Result<Self>
    where
        T: Transport + Send + 'static,
        C: Clock + 'static,
    {
        let device_id = engine.device_id().to_string();
        let control = engine.control();
        let running = Arc::new(AtomicBool::new(true));
        let shared = Arc::new(Shared {
            state: Mutex::new(PollState {
                snapshot: Snapshot {
                    cycle: 0,
                    address: config.address,
                    data: vec![0; config.length],
                    ignored_reads: 0,
                    read_errors: 0,
                    write_errors: 0,
                    sync: engine.sync_state(),
                },
                finished: None,
            }),
            changed: Condvar::new(),
            writes: Mutex::new(VecDeque::new()),
        });

        let handle = {
            let running = Arc::clone(&running);
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("mrlink-poll-{device_id}"))
                .spawn(move || run(engine, config, &running, &shared))
                .map_err(TransportError::from)?
        };

        info!(device = %device_id, "poller started");
        Ok(Self {
            device_id,
            control,
            running,
            shared,
            handle: Some(handle),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The most recent snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.shared.state.lock().snapshot.clone()
    }

    /// Wait until at least `cycle` cycles have completed or the loop has
    /// ended. Returns `None` on timeout.
    pub fn wait_for_cycle(&self, cycle: u64, timeout: Duration) -> Option<Snapshot> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.snapshot.cycle < cycle && state.finished.is_none() {
            if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
                return None;
            }
        }
        Some(state.snapshot.clone())
    }

    /// Queue a write for the next cycle.
    pub fn queue_write(&self, address: usize, data: impl Into<Vec<u8>>) {
        self.shared.writes.lock().push_back((address, data.into()));
    }

    /// Whether the loop is still running.
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().finished.is_none()
    }

    /// Why the loop stopped, once it has.
    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        self.shared.state.lock().finished
    }

    /// Interrupt any blocked read, stop the loop, and wait for it to exit.
    pub fn close(mut self) -> PollExit {
        self.stop()
    }

    /// Wait for the loop to end on its own (cycle limit or failure).
    pub fn join(mut self) -> PollExit {
        self.wait()
    }

    fn stop(&mut self) -> PollExit {
        self.running.store(false, Ordering::SeqCst);
        self.control.request_read_interrupt(true);
        self.wait()
    }

    fn wait(&mut self) -> PollExit {
        let cycles = self.shared.state.lock().snapshot.cycle;
        let Some(handle) = self.handle.take() else {
            return PollExit {
                reason: self.shutdown_reason().unwrap_or(ShutdownReason::Normal),
                error: None,
                cycles,
            };
        };
        match handle.join() {
            Ok(exit) => exit,
            Err(_) => {
                error!(device = %self.device_id, "poll thread panicked");
                self.control.close();
                PollExit {
                    reason: ShutdownReason::Abnormal,
                    error: None,
                    cycles,
                }
            }
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

fn run<T: Transport, C: Clock>(
    mut engine: ProtocolEngine<T, C>,
    config: PollerConfig,
    running: &AtomicBool,
    shared: &Shared,
) -> PollExit {
    let mut buffer = vec![0u8; config.length];
    let mut cycle = 0u64;
    let mut ignored_reads = 0u64;
    let mut failure = None;

    let reason = loop {
        if !running.load(Ordering::SeqCst) {
            break ShutdownReason::Normal;
        }
        if config.max_cycles.is_some_and(|max| cycle >= max) {
            break ShutdownReason::Normal;
        }

        // Later cycles will read the window again anyway, so only the first read retries.
        let retry = cycle == 0;
        let outcome = poll_once(&mut engine, &config, &mut buffer, retry, shared);
        let refreshed = matches!(outcome, Ok(Disposition::Completed));
        match outcome {
            Ok(Disposition::Completed) => {}
            Ok(Disposition::Ignored) => ignored_reads += 1,
            Ok(Disposition::DeviceClosed) => break stop_reason(running, ShutdownReason::Abnormal),
            Err(CommError::Interrupted) => {
                debug!(device = engine.device_id(), "poll interrupted");
                break ShutdownReason::Normal;
            }
            Err(err) => {
                let reason = if err.is_timeout() {
                    ShutdownReason::AbnormalAttemptReopen
                } else {
                    ShutdownReason::Abnormal
                };
                let reason = stop_reason(running, reason);
                if reason != ShutdownReason::Normal && !matches!(err, CommError::DeviceClosed) {
                    error!(device = engine.device_id(), error = %err, "poll cycle failed");
                    failure = Some(err);
                }
                break reason;
            }
        }

        cycle += 1;
        {
            let mut state = shared.state.lock();
            let snapshot = &mut state.snapshot;
            snapshot.cycle = cycle;
            if refreshed {
                snapshot.data.copy_from_slice(&buffer);
            }
            snapshot.ignored_reads = ignored_reads;
            snapshot.read_errors = engine.read_error_count();
            snapshot.write_errors = engine.write_error_count();
            snapshot.sync = engine.sync_state();
        }
        shared.changed.notify_all();

        if !config.interval.is_zero() && running.load(Ordering::SeqCst) {
            engine.clock().sleep(config.interval);
        }
    };

    engine.close();
    info!(device = engine.device_id(), ?reason, cycles = cycle, "poller stopped");
    {
        let mut state = shared.state.lock();
        state.finished = Some(reason);
        state.snapshot.read_errors = engine.read_error_count();
        state.snapshot.write_errors = engine.write_error_count();
    }
    shared.changed.notify_all();
    PollExit {
        reason,
        error: failure,
        cycles: cycle,
    }
}

/// A failure seen after close was requested is part of a normal shutdown.
fn stop_reason(running: &AtomicBool, reason: ShutdownReason) -> ShutdownReason {
    if running.load(Ordering::SeqCst) {
        reason
    } else {
        ShutdownReason::Normal
    }
}

/// One cycle: read the window, flush queued writes, then check link health.
fn poll_once<T: Transport, C: Clock>(
    engine: &mut ProtocolEngine<T, C>,
    config: &PollerConfig,
    buffer: &mut [u8],
    retry: bool,
    shared: &Shared,
) -> Result<Disposition> {
    let disposition = match engine.read(config.address, buffer, retry) {
        Ok(disposition) => disposition,
        Err(err @ (CommError::Protocol { .. } | CommError::ShortRead { .. })) => {
            // Repeated failures trip the breaker below.
            warn!(device = engine.device_id(), error = %err, "could not read window");
            Disposition::Ignored
        }
        Err(err) => return Err(err),
    };
    if disposition == Disposition::DeviceClosed {
        return Ok(disposition);
    }

    loop {
        let Some((address, data)) = shared.writes.lock().pop_front() else {
            break;
        };
        match engine.write(address, &data) {
            Ok(Disposition::DeviceClosed) => return Ok(Disposition::DeviceClosed),
            Ok(_) => {}
            Err(err @ (CommError::Protocol { .. } | CommError::ShortRead { .. })) => {
                warn!(device = engine.device_id(), address, error = %err, "could not write");
            }
            Err(err) => return Err(err),
        }
    }

    engine.check_sequential_errors()?;
    if !engine.transport().is_open() {
        return Err(CommError::DeviceClosed);
    }
    Ok(disposition)
}
