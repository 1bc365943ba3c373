use std::time::Duration;

use clap::{Args, Subcommand};
use releasechan_channel::{SocketConfig, DEFAULT_SOCKET_BUFFER_SIZE};

use crate::exit::{CliError, CliResult};
use crate::output::OutputFormat;

pub mod bench;
pub mod doctor;
pub mod probe;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send releases through a fresh channel and print what arrives.
    Probe(ProbeArgs),
    /// Measure write-to-blocking-read latency.
    Bench(BenchArgs),
    /// Run local environment health checks.
    Doctor(DoctorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Probe(args) => probe::run(args, format),
        Command::Bench(args) => bench::run(args, format),
        Command::Doctor(args) => doctor::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Socket settings shared by commands that open a channel.
#[derive(Args, Debug, Clone)]
pub struct ChannelArgs {
    /// Diagnostic channel name.
    #[arg(long, default_value = "releasechan")]
    pub name: String,
    /// SO_SNDBUF/SO_RCVBUF size in bytes for both socket ends.
    #[arg(long, env = "RELEASECHAN_SOCKET_BUFFER", default_value_t = DEFAULT_SOCKET_BUFFER_SIZE)]
    pub socket_buffer: usize,
    /// Producer-side receive timeout (e.g. 1s, 500ms).
    #[arg(long, default_value = "1s")]
    pub producer_timeout: String,
}

impl ChannelArgs {
    pub fn config(&self) -> CliResult<SocketConfig> {
        if self.socket_buffer == 0 {
            return Err(CliError::usage("socket buffer must be greater than zero"));
        }
        Ok(SocketConfig {
            socket_buffer_size: self.socket_buffer,
            producer_receive_timeout: parse_duration(&self.producer_timeout)?,
        })
    }
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub channel: ChannelArgs,
    /// Number of releases to send.
    #[arg(long, short = 'n', default_value_t = 8)]
    pub count: usize,
    /// Delay between releases (e.g. 10ms, 1s).
    #[arg(long, default_value = "10ms")]
    pub interval: String,
    /// Attach a file-backed fence to every release.
    #[arg(long)]
    pub fence: bool,
    /// Value reported as the max acquired buffer count.
    #[arg(long, default_value_t = 1)]
    pub max_acquired: u32,
    /// Longest wait for any single release (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct BenchArgs {
    #[command(flatten)]
    pub channel: ChannelArgs,
    /// Number of round trips to measure.
    #[arg(long, short = 'n', default_value_t = 1000)]
    pub count: usize,
    /// Attach a file-backed fence to every release.
    #[arg(long)]
    pub fence: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

/// Parse `500ms`, `2s`, or a bare number of seconds. `0` is allowed and
/// means "do not wait".
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
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
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// An unlinked temporary file whose descriptor stands in for a fence.
pub fn file_fence() -> CliResult<releasechan_frame::Fence> {
    let path = std::env::temp_dir().join(format!(
        "releasechan-fence-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default()
    ));
    let file = std::fs::File::create(&path)
        .map_err(|err| crate::exit::io_error("fence file create failed", err))?;
    let _ = std::fs::remove_file(&path);
    Ok(releasechan_frame::Fence::new(file.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::USAGE;

    #[test]
    fn parse_duration_seconds() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn parse_duration_millis() {
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
    }

    #[test]
    fn parse_duration_invalid() {
        assert_eq!(parse_duration("").unwrap_err().code, USAGE);
        assert_eq!(parse_duration("bad").unwrap_err().code, USAGE);
        assert_eq!(parse_duration("-1s").unwrap_err().code, USAGE);
    }

    #[test]
    fn channel_args_build_config() {
        let args = ChannelArgs {
            name: "x".to_string(),
            socket_buffer: 65536,
            producer_timeout: "250ms".to_string(),
        };
        let config = args.config().unwrap();
        assert_eq!(config.socket_buffer_size, 65536);
        assert_eq!(config.producer_receive_timeout, Duration::from_millis(250));
    }

    #[test]
    fn channel_args_reject_zero_buffer() {
        let args = ChannelArgs {
            name: "x".to_string(),
            socket_buffer: 0,
            producer_timeout: "1s".to_string(),
        };
        assert_eq!(args.config().unwrap_err().code, USAGE);
    }
}
