use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use slavelink_frame::CommandFrame;
use slavelink_master::LinkStats;
use slavelink_telemetry::{measurement_name, TelemetryEvent};

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
struct PayloadOutput<'a> {
    channel: &'a str,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

#[derive(Serialize)]
struct CommandOutput {
    kind: &'static str,
    address: u8,
    broadcast: bool,
    payload_hex: String,
    wire_hex: Option<String>,
}

#[derive(Serialize)]
struct MeasurementOutput {
    id: u8,
    name: Option<&'static str>,
    value: f64,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum TelemetryOutput {
    Measurement {
        timestamp_ms: u32,
        values: Vec<MeasurementOutput>,
    },
    PowerInterruption {
        timestamp_ms: u32,
    },
    Unrecognized {
        message_id: u8,
    },
}

/// Print one payload received on a channel.
pub fn print_payload(channel: &str, payload: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = PayloadOutput {
                channel,
                payload_size: payload.len(),
                payload: payload_preview(payload),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    channel.to_string(),
                    payload.len().to_string(),
                    payload_preview(payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel={} size={} payload={}",
                channel,
                payload.len(),
                payload_preview(payload)
            );
        }
        OutputFormat::Raw => print_raw(payload),
    }
}

/// Print a command frame, with its wire form when it was just encoded.
pub fn print_command(frame: &CommandFrame, wire: Option<&[u8]>, format: OutputFormat) {
    let out = CommandOutput {
        kind: "command",
        address: frame.address,
        broadcast: frame.is_broadcast(),
        payload_hex: hex::encode(&frame.payload),
        wire_hex: wire.map(hex::encode),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ADDRESS", "BROADCAST", "PAYLOAD", "WIRE"])
                .add_row(vec![
                    format!("{:#04x}", out.address),
                    out.broadcast.to_string(),
                    out.payload_hex.clone(),
                    out.wire_hex.clone().unwrap_or_default(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            print!("address={:#04x} payload={}", out.address, out.payload_hex);
            match &out.wire_hex {
                Some(wire) => println!(" wire={wire}"),
                None => println!(),
            }
        }
        OutputFormat::Raw => print_raw(wire.unwrap_or(&frame.payload[..])),
    }
}

pub fn print_telemetry(event: &TelemetryEvent, format: OutputFormat) {
    let out = match event {
        TelemetryEvent::Measurement { timestamp_ms, set } => TelemetryOutput::Measurement {
            timestamp_ms: *timestamp_ms,
            values: set
                .iter()
                .map(|(id, value)| MeasurementOutput {
                    id,
                    name: measurement_name(id),
                    value,
                })
                .collect(),
        },
        TelemetryEvent::PowerInterruption { timestamp_ms } => TelemetryOutput::PowerInterruption {
            timestamp_ms: *timestamp_ms,
        },
        TelemetryEvent::Unrecognized { message_id } => TelemetryOutput::Unrecognized {
            message_id: *message_id,
        },
    };

    match (format, &out) {
        (OutputFormat::Table, TelemetryOutput::Measurement { timestamp_ms, values }) => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TIMESTAMP_MS", "ID", "NAME", "VALUE"]);
            for v in values {
                table.add_row(vec![
                    timestamp_ms.to_string(),
                    v.id.to_string(),
                    v.name.unwrap_or("-").to_string(),
                    v.value.to_string(),
                ]);
            }
            println!("{table}");
        }
        (OutputFormat::Pretty, TelemetryOutput::Measurement { timestamp_ms, values }) => {
            let fields: Vec<String> = values
                .iter()
                .map(|v| match v.name {
                    Some(name) => format!("{name}={}", v.value),
                    None => format!("bit{}={}", v.id, v.value),
                })
                .collect();
            println!("ts={timestamp_ms} {}", fields.join(" "));
        }
        _ => print_json(&out),
    }
}

pub fn print_stats(stats: &LinkStats, format: OutputFormat) {
    let rows = [
        ("requests_sent", stats.requests_sent),
        ("frames_received", stats.frames_received),
        ("checksum_errors", stats.checksum_errors),
        ("short_frames", stats.short_frames),
        ("overflows", stats.overflows),
        ("timeouts", stats.timeouts),
        ("io_errors", stats.io_errors),
    ];
    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COUNTER", "VALUE"]);
            for (name, value) in rows {
                table.add_row(vec![name.to_string(), value.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for (name, value) in rows {
                println!("{name}={value}");
            }
        }
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = rows
                .iter()
                .map(|(name, value)| (name.to_string(), serde_json::Value::from(*value)))
                .collect();
            print_json(&map);
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

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
