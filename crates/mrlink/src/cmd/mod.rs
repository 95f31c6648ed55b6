use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use mrlink_engine::{open_serial_with_config, EngineConfig, PretendDevice, ProtocolEngine};
use mrlink_transport::{SerialConfig, Transport};
use tracing::debug;

use crate::exit::{comm_error, io_error, CliError, CliResult, DATA_INVALID, USAGE};
use crate::output::OutputFormat;

pub mod poll;
pub mod ports;
pub mod read;
pub mod version;
pub mod write;

/// Port name that selects the in-process simulated controller.
pub const PRETEND_PORT: &str = "pretend";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read a register window once.
    Read(ReadArgs),
    /// Write bytes to a register window.
    Write(WriteArgs),
    /// Poll a register window until interrupted or a cycle limit is hit.
    Poll(PollArgs),
    /// List serial ports visible to this host.
    Ports,
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, settings: &Settings) -> CliResult<i32> {
    match command {
        Command::Read(args) => read::run(args, format, settings),
        Command::Write(args) => write::run(args, format, settings),
        Command::Poll(args) => poll::run(args, format, settings),
        Command::Ports => ports::run(format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DeviceArgs {
    /// Serial port path, or `pretend` for the simulated controller.
    pub port: String,
    /// Simulated controller: swallow the next N requests without answering.
    #[arg(long, value_name = "N", default_value = "0")]
    pub pretend_drop: usize,
    /// Simulated controller: answer the next N requests with a failure.
    #[arg(long, value_name = "N", default_value = "0")]
    pub pretend_reject: usize,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// First register (decimal or 0x-prefixed hex).
    #[arg(long, short = 'a', value_parser = parse_address)]
    pub address: usize,
    /// Number of bytes to read.
    #[arg(long, short = 'n', default_value = "1", value_parser = clap::value_parser!(u8).range(1..))]
    pub length: u8,
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// First register (decimal or 0x-prefixed hex).
    #[arg(long, short = 'a', value_parser = parse_address)]
    pub address: usize,
    /// Bytes to write as hex, e.g. `0a0b` or `0a:0b`.
    #[arg(long)]
    pub data: String,
}

#[derive(Args, Debug)]
pub struct PollArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// First register (decimal or 0x-prefixed hex).
    #[arg(long, short = 'a', value_parser = parse_address)]
    pub address: usize,
    /// Number of bytes per cycle.
    #[arg(long, short = 'n', default_value = "1", value_parser = clap::value_parser!(u8).range(1..))]
    pub length: u8,
    /// Pause between cycles in milliseconds.
    #[arg(long, default_value = "10")]
    pub interval_ms: u64,
    /// Stop after N cycles.
    #[arg(long)]
    pub count: Option<u64>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Engine and port settings shared by every device command.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub engine: EngineConfig,
    pub serial: SerialConfig,
}

impl Settings {
    /// Merge an optional JSON engine config file with command-line port settings.
    pub fn load(config: Option<&Path>, baud_rate: u32) -> CliResult<Self> {
        let engine = match config {
            Some(path) => load_engine_config(path)?,
            None => EngineConfig::default(),
        };
        Ok(Self {
            engine,
            serial: SerialConfig {
                baud_rate,
                ..SerialConfig::default()
            },
        })
    }
}

fn load_engine_config(path: &Path) -> CliResult<EngineConfig> {
    let context = format!("config {}", path.display());
    let text = std::fs::read_to_string(path).map_err(|err| io_error(&context, err))?;
    let engine = serde_json::from_str(&text)
        .map_err(|err| CliError::new(DATA_INVALID, format!("{context}: {err}")))?;
    debug!(path = %path.display(), ?engine, "loaded engine config");
    Ok(engine)
}

pub type DynEngine = ProtocolEngine<Box<dyn Transport + Send>>;

/// Open the requested device, real or simulated.
pub fn open_engine(device: &DeviceArgs, settings: &Settings) -> CliResult<DynEngine> {
    if device.port == PRETEND_PORT {
        let mut pretend = PretendDevice::new();
        let seed: Vec<u8> = (0..=u8::MAX).collect();
        pretend.set_registers(0, &seed);
        pretend.drop_next_responses(device.pretend_drop);
        pretend.reject_next_requests(device.pretend_reject);
        let transport: Box<dyn Transport + Send> = Box::new(pretend);
        return Ok(ProtocolEngine::with_config(
            transport,
            settings.engine.clone(),
        ));
    }

    if device.pretend_drop > 0 || device.pretend_reject > 0 {
        return Err(CliError::new(
            USAGE,
            "--pretend-drop and --pretend-reject only apply to the pretend port",
        ));
    }

    let engine = open_serial_with_config(
        PathBuf::from(&device.port),
        &settings.serial,
        settings.engine.clone(),
    )
    .map_err(|err| comm_error(&format!("open {}", device.port), err))?;
    let transport: Box<dyn Transport + Send> = Box::new(engine.into_inner());
    Ok(ProtocolEngine::with_config(
        transport,
        settings.engine.clone(),
    ))
}

/// Accept decimal or `0x`-prefixed hex register addresses.
pub fn parse_address(value: &str) -> Result<usize, String> {
    let value = value.trim();
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|err| format!("invalid address '{value}': {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn addresses_accept_decimal_and_hex() {
        assert_eq!(parse_address("16"), Ok(16));
        assert_eq!(parse_address("0x10"), Ok(16));
        assert_eq!(parse_address("0XfF"), Ok(255));
        assert!(parse_address("sixteen").is_err());
        assert!(parse_address("0x").is_err());
    }

    #[test]
    fn settings_default_without_config_file() {
        let settings = Settings::load(None, 115_200).expect("defaults should load");
        assert_eq!(settings.serial.baud_rate, 115_200);
        assert_eq!(settings.engine.read_retry_count, 4);
    }

    #[test]
    fn settings_read_engine_config_file() {
        let path = std::env::temp_dir().join(format!("mrlink-config-{}.json", std::process::id()));
        let mut file = std::fs::File::create(&path).expect("temp config should be writable");
        file.write_all(br#"{"read_retry_count": 2, "max_sequential_errors": 9}"#)
            .expect("temp config should be written");
        drop(file);

        let settings = Settings::load(Some(path.as_path()), 250_000).expect("config should parse");
        let _ = std::fs::remove_file(&path);
        assert_eq!(settings.engine.read_retry_count, 2);
        assert_eq!(settings.engine.max_sequential_errors, 9);
        assert_eq!(settings.engine.write_retry_count, 4);
    }

    #[test]
    fn invalid_config_is_data_invalid() {
        let path =
            std::env::temp_dir().join(format!("mrlink-bad-config-{}.json", std::process::id()));
        std::fs::write(&path, "{not json").expect("temp config should be written");

        let err = Settings::load(Some(path.as_path()), 250_000).expect_err("bad config should fail");
        let _ = std::fs::remove_file(&path);
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn pretend_flags_rejected_for_real_ports() {
        let device = DeviceArgs {
            port: "/dev/ttyUSB9".to_string(),
            pretend_drop: 1,
            pretend_reject: 0,
        };
        let err = open_engine(&device, &Settings::default()).expect_err("flags should be refused");
        assert_eq!(err.code, USAGE);
    }
}
