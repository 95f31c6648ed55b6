#![cfg(all(unix, feature = "cli"))]

use std::process::Command;

#[test]
fn invalid_write_data_returns_usage() {
    let output = Command::new(env!("CARGO_BIN_EXE_mrlink"))
        .args(["write", "pretend", "--address", "0", "--data", "xyz"])
        .output()
        .expect("write should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn out_of_range_address_returns_data_invalid() {
    let output = Command::new(env!("CARGO_BIN_EXE_mrlink"))
        .args(["read", "pretend", "--address", "300"])
        .output()
        .expect("read should run");

    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn missing_port_returns_transport_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_mrlink"))
        .args(["--log-level", "error", "read", "/dev/mrlink-missing-port", "--address", "0"])
        .output()
        .expect("read should run");

    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn ports_lists_json_array() {
    let output = Command::new(env!("CARGO_BIN_EXE_mrlink"))
        .args(["--format", "json", "ports"])
        .output()
        .expect("ports should run");

    assert!(output.status.success());
    let value: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("ports output should be json");
    assert!(value.is_array());
}

#[test]
fn version_prints_name_and_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_mrlink"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("mrlink {}", env!("CARGO_PKG_VERSION")));
}
