use mrlink_transport::list_ports;

use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_ports, OutputFormat};

pub fn run(format: OutputFormat) -> CliResult<i32> {
    let ports = list_ports();
    tracing::debug!(count = ports.len(), "enumerated serial ports");
    print_ports(&ports, format);
    Ok(SUCCESS)
}
