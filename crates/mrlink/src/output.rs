use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use mrlink_engine::Snapshot;
use mrlink_transport::PortInfo;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ReadOutput<'a> {
    device: &'a str,
    address: usize,
    length: usize,
    data: String,
}

#[derive(Serialize)]
struct WriteOutput<'a> {
    device: &'a str,
    address: usize,
    written: usize,
}

#[derive(Serialize)]
struct SnapshotOutput<'a> {
    device: &'a str,
    cycle: u64,
    address: usize,
    data: String,
    ignored_reads: u64,
    read_errors: u32,
    write_errors: u32,
    sync: mrlink_engine::SyncState,
}

impl<'a> SnapshotOutput<'a> {
    fn new(device: &'a str, snapshot: &Snapshot) -> Self {
        Self {
            device,
            cycle: snapshot.cycle,
            address: snapshot.address,
            data: to_hex(&snapshot.data),
            ignored_reads: snapshot.ignored_reads,
            read_errors: snapshot.read_errors,
            write_errors: snapshot.write_errors,
            sync: snapshot.sync,
        }
    }
}

#[derive(Serialize)]
struct PortOutput<'a> {
    name: &'a str,
    vid: Option<String>,
    pid: Option<String>,
    manufacturer: Option<&'a str>,
    product: Option<&'a str>,
    serial_number: Option<&'a str>,
}

pub fn print_read(device: &str, address: usize, data: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ReadOutput {
            device,
            address,
            length: data.len(),
            data: to_hex(data),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DEVICE", "ADDRESS", "LENGTH", "DATA"])
                .add_row(vec![
                    device.to_string(),
                    format!("0x{address:02x}"),
                    data.len().to_string(),
                    to_hex(data),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "device={device} addr=0x{address:02x} len={} data={}",
                data.len(),
                to_hex(data)
            );
        }
        OutputFormat::Raw => print_raw(data),
    }
}

pub fn print_write(device: &str, address: usize, written: usize, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&WriteOutput {
            device,
            address,
            written,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DEVICE", "ADDRESS", "WRITTEN"])
                .add_row(vec![
                    device.to_string(),
                    format!("0x{address:02x}"),
                    written.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("device={device} addr=0x{address:02x} written={written}");
        }
        // Nothing to echo for a write.
        OutputFormat::Raw => {}
    }
}

pub fn print_snapshot(device: &str, snapshot: &Snapshot, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&SnapshotOutput::new(device, snapshot)),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CYCLE", "ADDRESS", "DATA", "IGNORED", "ERRORS R/W"])
                .add_row(vec![
                    snapshot.cycle.to_string(),
                    format!("0x{:02x}", snapshot.address),
                    to_hex(&snapshot.data),
                    snapshot.ignored_reads.to_string(),
                    format!("{}/{}", snapshot.read_errors, snapshot.write_errors),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "cycle={} addr=0x{:02x} data={} ignored={} errors={}/{}",
                snapshot.cycle,
                snapshot.address,
                to_hex(&snapshot.data),
                snapshot.ignored_reads,
                snapshot.read_errors,
                snapshot.write_errors
            );
        }
        OutputFormat::Raw => print_raw(&snapshot.data),
    }
}

pub fn print_ports(ports: &[PortInfo], format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => {
            let out: Vec<PortOutput<'_>> = ports
                .iter()
                .map(|port| PortOutput {
                    name: &port.name,
                    vid: port.vid.map(|vid| format!("{vid:04x}")),
                    pid: port.pid.map(|pid| format!("{pid:04x}")),
                    manufacturer: port.manufacturer.as_deref(),
                    product: port.product.as_deref(),
                    serial_number: port.serial_number.as_deref(),
                })
                .collect();
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PORT", "VID:PID", "PRODUCT", "SERIAL"]);
            for port in ports {
                table.add_row(vec![
                    port.name.clone(),
                    usb_id(port),
                    port.product.clone().unwrap_or_default(),
                    port.serial_number.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for port in ports {
                println!(
                    "{} {} {}",
                    port.name,
                    usb_id(port),
                    port.product.as_deref().unwrap_or("")
                );
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn usb_id(port: &PortInfo) -> String {
    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => format!("{vid:04x}:{pid:04x}"),
        _ => "-".to_string(),
    }
}

/// Lowercase hex without separators.
pub fn to_hex(data: &[u8]) -> String {
    data.iter().map(|byte| format!("{byte:02x}")).collect()
}
