use mrlink_engine::Disposition;

use crate::cmd::{open_engine, ReadArgs, Settings};
use crate::exit::{comm_error, CliError, CliResult, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_read, OutputFormat};

pub fn run(args: ReadArgs, format: OutputFormat, settings: &Settings) -> CliResult<i32> {
    let mut engine = open_engine(&args.device, settings)?;
    let mut buffer = vec![0u8; usize::from(args.length)];

    let disposition = engine
        .read(args.address, &mut buffer, true)
        .map_err(|err| comm_error("read failed", err))?;
    let device = engine.device_id().to_string();
    engine.close();

    match disposition {
        Disposition::Completed => {
            print_read(&device, args.address, &buffer, format);
            Ok(SUCCESS)
        }
        Disposition::DeviceClosed => Err(CliError::new(
            TRANSPORT_ERROR,
            format!("read failed: {device} closed during exchange"),
        )),
        Disposition::Ignored => Err(CliError::new(
            TRANSPORT_ERROR,
            format!("read failed: {device} did not answer"),
        )),
    }
}
