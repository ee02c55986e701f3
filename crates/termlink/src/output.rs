use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use termlink_frame::{Package, Payload};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
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
struct PackageOutput<'a> {
    kind: &'a str,
    name: &'a str,
    size: usize,
    value: serde_json::Value,
    peer: &'a str,
}

pub fn print_package(package: &Package, peer: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = PackageOutput {
                kind: package.kind().name(),
                name: &package.name,
                size: payload_size(&package.payload),
                value: payload_json(&package.payload),
                peer,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "NAME", "SIZE", "PEER", "VALUE"])
                .add_row(vec![
                    package.kind().name().to_string(),
                    package.name.clone(),
                    payload_size(&package.payload).to_string(),
                    peer.to_string(),
                    payload_preview(&package.payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "kind={} name={} size={} peer={} value={}",
                package.kind().name(),
                package.name,
                payload_size(&package.payload),
                peer,
                payload_preview(&package.payload)
            );
        }
    }
}

fn payload_size(payload: &Payload) -> usize {
    match payload {
        Payload::SingleString(s) => s.len(),
        Payload::SingleInt32(_) => 4,
        Payload::Bytes(data) => data.len(),
        Payload::StringList(list) => list.iter().map(|s| s.len() + 1).sum(),
    }
}

fn payload_json(payload: &Payload) -> serde_json::Value {
    match payload {
        Payload::SingleString(s) => serde_json::Value::from(s.as_str()),
        Payload::SingleInt32(n) => serde_json::Value::from(*n),
        Payload::Bytes(data) => match std::str::from_utf8(data) {
            Ok(text) => serde_json::Value::from(text),
            Err(_) => serde_json::Value::from(format!("<binary {} bytes>", data.len())),
        },
        Payload::StringList(list) => serde_json::Value::from(list.clone()),
    }
}

fn payload_preview(payload: &Payload) -> String {
    match payload {
        Payload::SingleString(s) => s.clone(),
        Payload::SingleInt32(n) => n.to_string(),
        Payload::Bytes(data) => match std::str::from_utf8(data) {
            Ok(text) => text.to_string(),
            Err(_) => format!("<binary {} bytes>", data.len()),
        },
        Payload::StringList(list) => list.join(", "),
    }
}
