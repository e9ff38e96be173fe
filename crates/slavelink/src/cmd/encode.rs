use bytes::BytesMut;
use slavelink_frame::{encode_command, CommandFrame};

use crate::cmd::{parse_hex, EncodeArgs};
use crate::exit::{frame_error, CliResult, SUCCESS};
use crate::output::{print_command, OutputFormat};

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = parse_hex(&args.payload)?;

    let mut wire = BytesMut::new();
    encode_command(args.address, &payload, &mut wire, args.max_frame)
        .map_err(|err| frame_error("encode failed", err))?;

    let frame = CommandFrame::new(args.address, payload);
    print_command(&frame, Some(&wire[..]), format);
    Ok(SUCCESS)
}
