use bytes::Bytes;
use slavelink_frame::{decode_command, SOF_MARKER};
use slavelink_telemetry::TelemetryDecoder;

use crate::cmd::{parse_hex, DecodeArgs};
use crate::exit::{frame_error, telemetry_error, CliResult, SUCCESS};
use crate::output::{print_command, print_telemetry, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let raw = parse_hex(&args.hex)?;

    if raw.starts_with(&SOF_MARKER) {
        let frame = Bytes::from(raw).slice(SOF_MARKER.len()..);
        let event = TelemetryDecoder::decode(&frame)
            .map_err(|err| telemetry_error("telemetry decode failed", err))?;
        print_telemetry(&event, format);
    } else {
        let frame = decode_command(&raw, args.max_frame)
            .map_err(|err| frame_error("command decode failed", err))?;
        print_command(&frame, None, format);
    }

    Ok(SUCCESS)
}
