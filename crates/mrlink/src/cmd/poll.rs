use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mrlink_engine::{Poller, PollerConfig};
use tracing::info;

use crate::cmd::{open_engine, PollArgs, Settings};
use crate::exit::{comm_error, shutdown_code, CliError, CliResult};
use crate::output::{print_snapshot, OutputFormat};

const WAIT_SLICE: Duration = Duration::from_millis(200);

pub fn run(args: PollArgs, format: OutputFormat, settings: &Settings) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let engine = open_engine(&args.device, settings)?;
    let config = PollerConfig {
        address: args.address,
        length: usize::from(args.length),
        interval: Duration::from_millis(args.interval_ms),
        max_cycles: args.count,
    };
    let poller = Poller::spawn(engine, config).map_err(|err| comm_error("poll start", err))?;
    let device = poller.device_id().to_string();

    let mut printed = 0;
    while running.load(Ordering::SeqCst) {
        if let Some(snapshot) = poller.wait_for_cycle(printed + 1, WAIT_SLICE) {
            if snapshot.cycle > printed {
                print_snapshot(&device, &snapshot, format);
                printed = snapshot.cycle;
            }
        }
        if !poller.is_running() {
            break;
        }
    }

    let last = poller.snapshot();
    let exit = if running.load(Ordering::SeqCst) {
        poller.join()
    } else {
        info!(device = %device, "poll interrupted");
        poller.close()
    };
    if last.cycle > printed {
        print_snapshot(&device, &last, format);
    }

    info!(
        device = %device,
        cycles = exit.cycles,
        reason = ?exit.reason,
        "poll finished"
    );
    match exit.error {
        Some(err) => Err(comm_error("poll failed", err)),
        None => Ok(shutdown_code(exit.reason)),
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
