use std::time::Duration;

use mrlink_engine::{
    CommError, CommKind, Disposition, ManualClock, Poller, PollerConfig, PretendDevice,
    ProtocolEngine, ShutdownReason, SyncState,
};

fn pretend_engine() -> (ProtocolEngine<PretendDevice, ManualClock>, ManualClock) {
    let clock = ManualClock::new();
    let engine = ProtocolEngine::new(PretendDevice::new()).with_clock(clock.clone());
    (engine, clock)
}

#[test]
fn write_then_read_back() {
    let (mut engine, _clock) = pretend_engine();

    let disposition = engine
        .write(0x40, &[0xDE, 0xAD, 0xBE, 0xEF])
        .expect("write should succeed");
    assert_eq!(disposition, Disposition::Completed);

    let mut buffer = [0u8; 4];
    let disposition = engine
        .read(0x40, &mut buffer, true)
        .expect("read should succeed");
    assert_eq!(disposition, Disposition::Completed);
    assert_eq!(buffer, [0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(engine.sync_state(), SyncState::Synchronized);
}

#[test]
fn full_length_read() {
    let (mut engine, _clock) = pretend_engine();
    let pattern: Vec<u8> = (0..=254).collect();
    engine.transport_mut().set_registers(0, &pattern);

    let mut buffer = vec![0u8; 255];
    let disposition = engine
        .read(0, &mut buffer, true)
        .expect("read should succeed");
    assert_eq!(disposition, Disposition::Completed);
    assert_eq!(buffer, pattern);
}

#[test]
fn dropped_responses_are_retried() {
    let (mut engine, clock) = pretend_engine();
    engine.transport_mut().set_registers(0x08, &[42]);
    engine.transport_mut().drop_next_responses(3);

    let mut buffer = [0u8; 1];
    let disposition = engine
        .read(0x08, &mut buffer, true)
        .expect("fourth attempt should succeed");

    assert_eq!(disposition, Disposition::Completed);
    assert_eq!(buffer, [42]);
    assert_eq!(engine.transport().requests_seen(), 4);
    assert_eq!(engine.read_error_count(), 0);
    assert_eq!(clock.elapsed(), Duration::from_millis(3 * (100 + 20)));
}

#[test]
fn too_many_dropped_responses_time_out() {
    let (mut engine, _clock) = pretend_engine();
    engine.transport_mut().drop_next_responses(4);

    let mut buffer = [0u8; 1];
    let err = engine
        .read(0x08, &mut buffer, true)
        .expect_err("all attempts should time out");

    assert_eq!(err.kind(), Some(CommKind::TimeoutRead));
    assert_eq!(engine.read_error_count(), 4);
}

#[test]
fn rejected_write_is_retried() {
    let (mut engine, clock) = pretend_engine();
    engine.transport_mut().reject_next_requests(1);

    let disposition = engine
        .write(0x10, &[1, 2])
        .expect("second attempt should succeed");
    assert_eq!(disposition, Disposition::Completed);

    assert_eq!(engine.transport().registers()[0x10..0x12], [1, 2]);
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_millis(40), Duration::from_millis(20)]
    );
}

#[test]
fn rejected_write_once_reports_write_failure() {
    let (mut engine, clock) = pretend_engine();
    engine.transport_mut().reject_next_requests(1);

    let err = engine
        .write_once(0x10, &[1, 2])
        .expect_err("rejected write should fail");

    assert_eq!(err.kind(), Some(CommKind::FailureWrite));
    assert!(err.to_string().starts_with("comm failure write ["));
    assert_eq!(engine.write_error_count(), 1);
    assert_eq!(clock.sleeps(), vec![Duration::from_millis(40)]);
}

#[test]
fn garbage_before_response_is_skipped_when_unsynchronized() {
    let (mut engine, _clock) = pretend_engine();
    engine.transport_mut().set_registers(0x00, &[5, 6]);
    engine
        .transport_mut()
        .garbage_before_next_response(&[0x33, 0x00, 0x33, 0xCC, 0x01]);

    let mut buffer = [0u8; 2];
    engine
        .read_once(0x00, &mut buffer)
        .expect("read should resynchronize");
    assert_eq!(buffer, [5, 6]);
}

#[test]
fn garbage_while_synchronized_loses_sync_then_recovers() {
    let (mut engine, _clock) = pretend_engine();
    let mut buffer = [0u8; 2];
    let disposition = engine.read(0x00, &mut buffer, true).expect("first read should succeed");
    assert_eq!(disposition, Disposition::Completed);
    assert_eq!(engine.sync_state(), SyncState::Synchronized);

    engine.transport_mut().set_registers(0x00, &[9, 9]);
    engine
        .transport_mut()
        .garbage_before_next_response(&[0xFF, 0xFF, 0xFF]);
    let err = engine
        .read_once(0x00, &mut buffer)
        .expect_err("garbage should break sync");
    assert_eq!(err.kind(), Some(CommKind::SyncLost));
    assert_eq!(engine.sync_state(), SyncState::Unsynchronized);

    let disposition = engine.read(0x00, &mut buffer, true).expect("retry should succeed");
    assert_eq!(disposition, Disposition::Completed);
    assert_eq!(buffer, [9, 9]);
}

#[test]
fn corrupted_length_is_a_payload_error() {
    let (mut engine, _clock) = pretend_engine();
    engine.transport_mut().corrupt_next_payload_length();

    let mut buffer = [0u8; 4];
    let err = engine
        .read_once(0x00, &mut buffer)
        .expect_err("length should not match");

    assert_eq!(err.kind(), Some(CommKind::PayloadErrorRead));
    assert_eq!(engine.sync_state(), SyncState::Unsynchronized);
}

#[test]
fn truncated_response_is_a_short_read_and_retried() {
    let (mut engine, _clock) = pretend_engine();
    engine.transport_mut().set_registers(0x20, &[1, 2, 3, 4]);
    engine.transport_mut().truncate_next_response(3);

    let mut buffer = [0u8; 4];
    let err = engine
        .read_once(0x20, &mut buffer)
        .expect_err("payload should be short");
    assert!(matches!(
        err,
        CommError::ShortRead {
            expected: 4,
            actual: 1,
            ..
        }
    ));
    let context = err.context().expect("short read should carry context");
    assert_eq!(context.device, "pretend");
    assert_eq!(context.address, 0x20);
    assert_eq!(context.request, "[55 aa 80 20 04]");
    assert!(err.to_string().contains("pretend: addr=32 len=4"));

    let disposition = engine.read(0x20, &mut buffer, true).expect("retry should succeed");
    assert_eq!(disposition, Disposition::Completed);
    assert_eq!(buffer, [1, 2, 3, 4]);
}

#[test]
fn circuit_breaker_trips_without_io() {
    let (mut engine, _clock) = pretend_engine();
    engine.transport_mut().drop_next_responses(usize::MAX);

    let mut buffer = [0u8; 1];
    assert!(engine.read(0, &mut buffer, true).is_err());
    assert!(engine.read(0, &mut buffer, true).is_err());
    let seen = engine.transport().requests_seen();

    let err = engine
        .read(0, &mut buffer, true)
        .expect_err("breaker should trip");
    assert!(matches!(err, CommError::TooManySequentialErrors { .. }));
    assert_eq!(engine.transport().requests_seen(), seen);
}

#[test]
fn closing_mid_failure_is_silent() {
    let (mut engine, _clock) = pretend_engine();
    engine.transport_mut().drop_next_responses(1);
    let control = engine.control();
    control.close();

    let mut buffer = [0u8; 1];
    assert_eq!(
        engine.read(0, &mut buffer, true).expect("closed read is silent"),
        Disposition::DeviceClosed
    );
    assert_eq!(
        engine.write(0, &[1]).expect("closed write is silent"),
        Disposition::DeviceClosed
    );
}

#[test]
fn poller_publishes_snapshots_and_applies_writes() {
    let mut device = PretendDevice::new();
    device.set_registers(0x10, &[1, 2, 3, 4]);
    let engine = ProtocolEngine::new(device);

    let poller = Poller::spawn(
        engine,
        PollerConfig {
            address: 0x10,
            length: 4,
            interval: Duration::from_millis(1),
            max_cycles: None,
        },
    )
    .expect("poller should start");

    let snapshot = poller
        .wait_for_cycle(1, Duration::from_secs(5))
        .expect("first cycle should complete");
    assert_eq!(snapshot.data, vec![1, 2, 3, 4]);
    assert_eq!(snapshot.address, 0x10);

    poller.queue_write(0x12, vec![9]);
    let mut next = snapshot.cycle + 1;
    let mut applied = false;
    for _ in 0..100 {
        let snapshot = poller
            .wait_for_cycle(next, Duration::from_secs(5))
            .expect("later cycles should complete");
        if snapshot.data == [1, 2, 9, 4] {
            applied = true;
            break;
        }
        next = snapshot.cycle + 1;
    }
    assert!(applied, "queued write never showed up in a snapshot");
    assert_eq!(poller.snapshot().write_errors, 0);

    let exit = poller.close();
    assert_eq!(exit.reason, ShutdownReason::Normal);
    assert!(exit.error.is_none());
}

#[test]
fn poller_stops_after_cycle_limit() {
    let engine = ProtocolEngine::new(PretendDevice::new());
    let poller = Poller::spawn(
        engine,
        PollerConfig {
            max_cycles: Some(3),
            interval: Duration::ZERO,
            ..PollerConfig::default()
        },
    )
    .expect("poller should start");

    let snapshot = poller.wait_for_cycle(3, Duration::from_secs(5));
    assert_eq!(snapshot.map(|snapshot| snapshot.cycle), Some(3));
    let exit = poller.join();
    assert_eq!(exit.reason, ShutdownReason::Normal);
    assert_eq!(exit.cycles, 3);
}

#[test]
fn poller_reports_timeouts_as_reopenable() {
    let mut device = PretendDevice::new();
    device.drop_next_responses(usize::MAX);
    let engine = ProtocolEngine::new(device).with_clock(ManualClock::new());

    let poller = Poller::spawn(engine, PollerConfig::default()).expect("poller should start");

    let exit = poller.join();
    assert_eq!(exit.reason, ShutdownReason::AbnormalAttemptReopen);
    assert!(exit.error.as_ref().is_some_and(CommError::is_timeout));
    assert_eq!(exit.cycles, 0);
}

#[test]
fn poller_trips_breaker_on_persistent_rejections() {
    let mut device = PretendDevice::new();
    device.reject_next_requests(usize::MAX);
    let engine = ProtocolEngine::new(device).with_clock(ManualClock::new());

    let poller = Poller::spawn(engine, PollerConfig::default()).expect("poller should start");

    let exit = poller.join();
    assert_eq!(exit.reason, ShutdownReason::Abnormal);
    assert!(matches!(
        exit.error,
        Some(CommError::TooManySequentialErrors { .. })
    ));
    assert_eq!(exit.cycles, 2);
}
