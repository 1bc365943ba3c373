use std::time::{Duration, Instant};

use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use releasechan_channel::{open_with_config, BlockingRead, ReleaseCallbackId, ReleaseReader};
use serde::Serialize;

use crate::cmd::{file_fence, BenchArgs};
use crate::exit::{channel_error, CliError, CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

const ROUND_TRIP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize, PartialEq)]
struct BenchOutput {
    count: usize,
    fence: bool,
    min_us: f64,
    p50_us: f64,
    p99_us: f64,
    max_us: f64,
}

pub fn run(args: BenchArgs, format: OutputFormat) -> CliResult<i32> {
    if args.count == 0 {
        return Err(CliError::usage("count must be greater than zero"));
    }

    let config = args.channel.config()?;
    let fence = if args.fence { Some(file_fence()?) } else { None };

    let (consumer, producer) = open_with_config(args.channel.name.clone(), &config)
        .map_err(|err| channel_error("channel open failed", err))?;
    let reader =
        ReleaseReader::new(consumer).map_err(|err| channel_error("reader setup failed", err))?;

    let mut samples = Vec::with_capacity(args.count);
    for seq in 0..args.count {
        let id = ReleaseCallbackId::new(seq as i64, seq as u64);
        let start = Instant::now();
        producer
            .write_release_fence(id, fence.as_ref(), 1)
            .map_err(|err| channel_error("write failed", err))?;

        match reader
            .read_blocking(ROUND_TRIP_TIMEOUT)
            .map_err(|err| channel_error("read failed", err))?
        {
            BlockingRead::Released(message) if message.release_callback_id == id => {
                samples.push(start.elapsed());
            }
            BlockingRead::Released(message) => {
                return Err(CliError::data_invalid(format!(
                    "expected release {id}, got {}",
                    message.release_callback_id
                )));
            }
            BlockingRead::WouldBlock | BlockingRead::TimedOut => {
                return Err(CliError::timeout(format!("release {id} did not arrive")));
            }
        }
    }

    let output = summarize(&mut samples, args.fence);
    print_bench(&output, format);
    Ok(SUCCESS)
}

fn summarize(samples: &mut [Duration], fence: bool) -> BenchOutput {
    samples.sort_unstable();
    let micros = |d: Duration| d.as_nanos() as f64 / 1_000.0;
    let percentile = |p: usize| {
        let idx = (samples.len() * p).div_ceil(100).saturating_sub(1);
        micros(samples[idx.min(samples.len() - 1)])
    };

    BenchOutput {
        count: samples.len(),
        fence,
        min_us: micros(samples[0]),
        p50_us: percentile(50),
        p99_us: percentile(99),
        max_us: micros(samples[samples.len() - 1]),
    }
}

fn print_bench(output: &BenchOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COUNT", "FENCE", "MIN µs", "P50 µs", "P99 µs", "MAX µs"])
                .add_row(vec![
                    output.count.to_string(),
                    output.fence.to_string(),
                    format!("{:.1}", output.min_us),
                    format!("{:.1}", output.p50_us),
                    format!("{:.1}", output.p99_us),
                    format!("{:.1}", output.max_us),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} round trips (fence={}): min={:.1}us p50={:.1}us p99={:.1}us max={:.1}us",
                output.count,
                output.fence,
                output.min_us,
                output.p50_us,
                output.p99_us,
                output.max_us
            );
        }
        OutputFormat::Raw => {
            println!(
                "{} {:.1} {:.1} {:.1} {:.1}",
                output.count, output.min_us, output.p50_us, output.p99_us, output.max_us
            );
        }
    }
}
