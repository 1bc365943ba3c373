use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use releasechan_frame::{flatten_release, Flattenable, ReleaseMessage};
use serde::Serialize;

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

#[derive(Debug, Serialize)]
pub struct ReleaseOutput<'a> {
    pub channel: &'a str,
    pub seq: usize,
    pub buffer_id: i64,
    pub frame_number: u64,
    pub max_acquired_buffer_count: u32,
    pub has_fence: bool,
    pub fence_signaled: Option<bool>,
    pub timestamp: String,
}

impl<'a> ReleaseOutput<'a> {
    pub fn new(channel: &'a str, seq: usize, message: &ReleaseMessage) -> Self {
        let fence = &message.release_fence;
        Self {
            channel,
            seq,
            buffer_id: message.release_callback_id.buffer_id,
            frame_number: message.release_callback_id.frame_number,
            max_acquired_buffer_count: message.max_acquired_buffer_count,
            has_fence: fence.is_valid(),
            fence_signaled: fence
                .is_valid()
                .then(|| fence.wait(std::time::Duration::ZERO).unwrap_or(false)),
            timestamp: now_unix_seconds(),
        }
    }
}

pub fn print_release(out: &ReleaseOutput<'_>, message: &ReleaseMessage, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SEQ", "BUFFER", "FRAME", "MAX ACQUIRED", "FENCE"])
                .add_row(vec![
                    out.seq.to_string(),
                    out.buffer_id.to_string(),
                    out.frame_number.to_string(),
                    out.max_acquired_buffer_count.to_string(),
                    fence_text(out).to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "#{} channel={} buffer={} frame={} max_acquired={} fence={}",
                out.seq,
                out.channel,
                out.buffer_id,
                out.frame_number,
                out.max_acquired_buffer_count,
                fence_text(out)
            );
        }
        OutputFormat::Raw => print_raw(&wire_bytes(message)),
    }
}

/// Re-encode a received release into its wire frame.
pub fn wire_bytes(message: &ReleaseMessage) -> Vec<u8> {
    let mut buf = vec![0u8; message.flattened_size()];
    let mut fds = Vec::new();
    match flatten_release(
        message.release_callback_id,
        &message.release_fence,
        message.max_acquired_buffer_count,
        &mut buf,
        &mut fds,
    ) {
        Ok(len) => buf.truncate(len),
        Err(_) => buf.clear(),
    }
    buf
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn fence_text(out: &ReleaseOutput<'_>) -> &'static str {
    match out.fence_signaled {
        None => "none",
        Some(true) => "signaled",
        Some(false) => "pending",
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
