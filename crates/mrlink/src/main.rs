mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;
use mrlink_transport::serial::DEFAULT_BAUD_RATE;

use crate::cmd::{Command, Settings};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "mrlink",
    version,
    about = "Talk to Modern Robotics style controllers over serial"
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    /// JSON file with engine retry and timing settings.
    #[arg(long, value_name = "FILE", env = "MRLINK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Serial line speed.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE, global = true)]
    baud: u32,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = Settings::load(cli.config.as_deref(), cli.baud)
        .and_then(|settings| cmd::run(cli.command, format, &settings));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
