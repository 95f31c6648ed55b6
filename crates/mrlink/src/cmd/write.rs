use mrlink_engine::Disposition;

use crate::cmd::{open_engine, Settings, WriteArgs};
use crate::exit::{comm_error, CliError, CliResult, SUCCESS, TRANSPORT_ERROR, USAGE};
use crate::output::{print_write, OutputFormat};

pub fn run(args: WriteArgs, format: OutputFormat, settings: &Settings) -> CliResult<i32> {
    let data = parse_hex(&args.data).map_err(|msg| CliError::new(USAGE, msg))?;
    let mut engine = open_engine(&args.device, settings)?;

    let disposition = engine
        .write(args.address, &data)
        .map_err(|err| comm_error("write failed", err))?;
    let device = engine.device_id().to_string();
    engine.close();

    match disposition {
        Disposition::Completed => {
            print_write(&device, args.address, data.len(), format);
            Ok(SUCCESS)
        }
        Disposition::DeviceClosed | Disposition::Ignored => Err(CliError::new(
            TRANSPORT_ERROR,
            format!("write failed: {device} closed during exchange"),
        )),
    }
}

/// Parse hex bytes. An optional `0x` prefix and `:`, `-`, `_` or whitespace
/// separators between bytes are accepted.
pub fn parse_hex(value: &str) -> Result<Vec<u8>, String> {
    let trimmed = value.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let digits: Vec<char> = body
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '_') && !c.is_whitespace())
        .collect();

    if digits.is_empty() {
        return Err("no data bytes given".to_string());
    }
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in '{value}'"));
    }

    digits
        .chunks(2)
        .map(|pair| {
            let text: String = pair.iter().collect();
            u8::from_str_radix(&text, 16).map_err(|_| format!("invalid hex byte '{text}'"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_accepts_prefix_and_separators() {
        assert_eq!(parse_hex("0a0B"), Ok(vec![0x0a, 0x0b]));
        assert_eq!(parse_hex("0x01:02 ff"), Ok(vec![0x01, 0x02, 0xff]));
        assert_eq!(parse_hex("de-ad_be ef"), Ok(vec![0xde, 0xad, 0xbe, 0xef]));
    }

    #[test]
    fn hex_rejects_malformed_input() {
        assert!(parse_hex("").is_err());
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
        assert!(parse_hex("0x").is_err());
    }
}
