use std::io::{IsTerminal, Write};
use std::net::SocketAddr;
use std::time::Duration;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use xrbridge_core::UploadStats;
use xrbridge_reqrep::{endpoint_name, EndpointInfo};

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
struct ReplyOutput<'a> {
    endpoint: &'a str,
    endpoint_name: &'a str,
    backend: &'a str,
    reply_size: usize,
    reply: String,
    elapsed_ms: u128,
}

pub fn print_reply(
    endpoint: &str,
    backend: &str,
    reply: &[u8],
    elapsed: Duration,
    format: OutputFormat,
) {
    let name = endpoint_name(endpoint);
    match format {
        OutputFormat::Json => {
            let out = ReplyOutput {
                endpoint,
                endpoint_name: name,
                backend,
                reply_size: reply.len(),
                reply: payload_preview(reply),
                elapsed_ms: elapsed.as_millis(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ENDPOINT", "SIZE", "ELAPSED", "REPLY"])
                .add_row(vec![
                    format!("{endpoint} ({name})"),
                    reply.len().to_string(),
                    format!("{}ms", elapsed.as_millis()),
                    payload_preview(reply),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "endpoint={} ({}) backend={} size={} elapsed={}ms reply={}",
                endpoint,
                name,
                backend,
                reply.len(),
                elapsed.as_millis(),
                payload_preview(reply)
            );
        }
        OutputFormat::Raw => print_raw(reply),
    }
}

#[derive(Serialize)]
struct UploadOutput<'a> {
    backend: &'a str,
    frame_size: usize,
    offered: usize,
    #[serde(flatten)]
    stats: UploadStats,
}

pub fn print_upload(
    backend: &str,
    frame_size: usize,
    offered: usize,
    stats: UploadStats,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => {
            print_json(&UploadOutput {
                backend,
                frame_size,
                offered,
                stats,
            });
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["FRAME SIZE", "OFFERED", "SENT", "OVERWRITTEN", "FAILED"])
                .add_row(vec![
                    frame_size.to_string(),
                    offered.to_string(),
                    stats.sent.to_string(),
                    stats.overwritten.to_string(),
                    stats.failed.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "backend={} frame_size={} offered={} sent={} overwritten={} failed={}",
                backend, frame_size, offered, stats.sent, stats.overwritten, stats.failed
            );
        }
    }
}

pub fn print_endpoints(endpoints: &[EndpointInfo], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&endpoints),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["CODE", "NAME", "PAYLOAD"]);
            for info in endpoints {
                table.add_row(vec![info.code, info.name, info.payload]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for info in endpoints {
                println!("{}\t{}\t{}", info.code, info.name, info.payload);
            }
        }
    }
}

/// Announce the bound address so scripts can find an ephemeral port.
pub fn print_listening(addr: SocketAddr, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "listening": addr.to_string() })),
        _ => println!("listening on {addr}"),
    }
    let _ = std::io::stdout().flush();
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
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
