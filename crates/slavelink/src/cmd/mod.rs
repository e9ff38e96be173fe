use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod decode;
pub mod encode;
pub mod listen;
pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Drive a serial link and serve its traffic on broadcast channels.
    Run(RunArgs),
    /// Encode a command frame and print it as hex.
    Encode(EncodeArgs),
    /// Decode a hex command frame or telemetry frame.
    Decode(DecodeArgs),
    /// Join a broadcast channel and print what it publishes.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Encode(args) => encode::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Serial device (or any read/write endpoint) to drive.
    pub device: PathBuf,
    /// JSON config file with `master` and `server` sections.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Override the nominal baud rate.
    #[arg(long)]
    pub baud: Option<u32>,
    /// Override the channel socket directory.
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,
    /// Override the default client slots per channel.
    #[arg(long)]
    pub max_clients: Option<usize>,
    /// Accept JSON requests on the `command` channel.
    #[arg(long)]
    pub accept_commands: bool,
    /// Stop after this long (e.g. 30s, 500ms). Default: until Ctrl-C.
    #[arg(long)]
    pub duration: Option<String>,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Slave address (0 broadcasts).
    #[arg(long, short = 'a', value_parser = parse_address)]
    pub address: u8,
    /// Payload as hex.
    #[arg(long, short = 'p', default_value = "")]
    pub payload: String,
    /// Largest frame accepted, address and CRC included.
    #[arg(long, default_value_t = slavelink_frame::DEFAULT_MAX_FRAME)]
    pub max_frame: usize,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Frame bytes as hex. Input starting with the SOF marker is decoded as telemetry.
    pub hex: String,
    /// Largest command frame accepted.
    #[arg(long, default_value_t = slavelink_frame::DEFAULT_MAX_FRAME)]
    pub max_frame: usize,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Channel to join.
    #[arg(default_value = slavelink_broadcast::TELEMETRY_CHANNEL)]
    pub channel: String,
    /// Channel socket directory.
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,
    /// Exit after receiving N payloads.
    #[arg(long)]
    pub count: Option<usize>,
    /// Join timeout (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `2s` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Parse hex with optional whitespace and `0x` prefix.
pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let cleaned: String = input
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(&cleaned).map_err(|err| CliError::new(USAGE, format!("invalid hex: {err}")))
}

fn parse_address(input: &str) -> Result<u8, String> {
    let parsed = match input.strip_prefix("0x") {
        Some(digits) => u8::from_str_radix(digits, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| format!("address must be 0-255, got {input}"))
}
