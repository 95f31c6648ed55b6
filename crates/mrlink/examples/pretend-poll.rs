//! Poll a simulated controller while writing to it.
//!
//! Run with:
//!   cargo run --example pretend-poll
//!
//! The same loop works against hardware by swapping the `PretendDevice` for
//! `mrlink::engine::open_serial("/dev/ttyUSB0")?`.

use std::time::Duration;

use mrlink::engine::{Poller, PollerConfig, PretendDevice, ProtocolEngine};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut device = PretendDevice::new();
    device.set_registers(0x00, b"mrlink");
    // A couple of lost responses early on exercise the retry path.
    device.drop_next_responses(2);

    let engine = ProtocolEngine::new(device);
    let poller = Poller::spawn(
        engine,
        PollerConfig {
            address: 0x00,
            length: 6,
            interval: Duration::from_millis(50),
            max_cycles: Some(20),
        },
    )?;

    let mut next = 1;
    while poller.is_running() {
        let Some(snapshot) = poller.wait_for_cycle(next, Duration::from_secs(2)) else {
            continue;
        };
        eprintln!(
            "cycle {:>2}: {:?} (ignored reads: {})",
            snapshot.cycle,
            String::from_utf8_lossy(&snapshot.data),
            snapshot.ignored_reads
        );
        if snapshot.cycle == 10 {
            poller.queue_write(0x00, b"MRLINK".to_vec());
        }
        next = snapshot.cycle + 1;
    }

    let exit = poller.join();
    eprintln!("stopped: {:?}", exit.reason);
    Ok(())
}
