use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use releasechan_channel::{
    open_with_config, BlockingRead, ChannelError, Fence, Interrupter, ProducerEndpoint,
    ReleaseCallbackId, ReleaseReader,
};
use tracing::{debug, info, warn};

use crate::cmd::{file_fence, parse_duration, ProbeArgs};
use crate::exit::{channel_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_release, OutputFormat, ReleaseOutput};

pub fn run(args: ProbeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.channel.config()?;
    let interval = parse_duration(&args.interval)?;
    let timeout = parse_duration(&args.timeout)?;
    let fence = if args.fence { Some(file_fence()?) } else { None };

    let (consumer, producer) = open_with_config(args.channel.name.clone(), &config)
        .map_err(|err| channel_error("channel open failed", err))?;
    let reader =
        ReleaseReader::new(consumer).map_err(|err| channel_error("reader setup failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone(), reader.interrupter())?;

    let sender = {
        let running = running.clone();
        let count = args.count;
        let max_acquired = args.max_acquired;
        thread::Builder::new()
            .name("producer".to_string())
            .spawn(move || send_releases(&producer, count, interval, fence, max_acquired, &running))
            .map_err(|err| CliError::internal(format!("producer thread spawn failed: {err}")))?
    };

    let outcome = receive_releases(&reader, &args, timeout, format, &running);

    // Closing the consumer unblocks a producer stuck on a full socket buffer.
    running.store(false, Ordering::SeqCst);
    drop(reader);

    let sent = match sender.join() {
        Ok(Ok(sent)) => sent,
        Ok(Err(err)) if err.is_broken_pipe() => {
            debug!("producer stopped: consumer closed");
            0
        }
        Ok(Err(err)) => return Err(channel_error("write failed", err)),
        Err(_) => return Err(CliError::internal("producer thread panicked")),
    };
    debug!(sent, "producer finished");

    let received = outcome?;
    info!(received, "probe finished");
    Ok(SUCCESS)
}

fn send_releases(
    producer: &ProducerEndpoint,
    count: usize,
    interval: Duration,
    fence: Option<Fence>,
    max_acquired: u32,
    running: &AtomicBool,
) -> Result<usize, ChannelError> {
    let mut sent = 0usize;
    for seq in 0..count {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let id = ReleaseCallbackId::new(seq as i64, seq as u64 + 1);
        producer.write_release_fence(id, fence.as_ref(), max_acquired)?;
        sent += 1;
        if !interval.is_zero() {
            thread::sleep(interval);
        }
    }
    Ok(sent)
}

fn receive_releases(
    reader: &ReleaseReader,
    args: &ProbeArgs,
    timeout: Duration,
    format: OutputFormat,
    running: &AtomicBool,
) -> CliResult<usize> {
    let name = reader.consumer().name();
    let mut received = 0usize;

    while received < args.count {
        let outcome = reader
            .read_blocking(timeout)
            .map_err(|err| channel_error("read failed", err))?;

        match outcome {
            BlockingRead::Released(message) => {
                let expected = ReleaseCallbackId::new(received as i64, received as u64 + 1);
                if message.release_callback_id != expected {
                    return Err(CliError::data_invalid(format!(
                        "out of order release: expected {expected}, got {}",
                        message.release_callback_id
                    )));
                }
                if args.fence && !message.release_fence.is_valid() {
                    return Err(CliError::data_invalid(format!(
                        "release {expected} arrived without its fence"
                    )));
                }
                let out = ReleaseOutput::new(name, received, &message);
                print_release(&out, &message, format);
                received += 1;
            }
            BlockingRead::WouldBlock => {
                if !running.load(Ordering::SeqCst) {
                    warn!(received, "interrupted");
                    return Err(CliError::new(
                        FAILURE,
                        format!("interrupted after {received} of {} releases", args.count),
                    ));
                }
                reader
                    .clear_interrupts()
                    .map_err(|err| channel_error("clear interrupts failed", err))?;
            }
            BlockingRead::TimedOut => {
                return Err(CliError::timeout(format!(
                    "no release within {timeout:?} ({received} of {} received)",
                    args.count
                )));
            }
        }
    }

    Ok(received)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>, interrupter: Interrupter) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
        let _ = interrupter.interrupt();
    })
    .map_err(|err| CliError::internal(format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use releasechan_channel::open;

    use super::*;

    fn run_args(count: usize) -> ProbeArgs {
        ProbeArgs {
            channel: crate::cmd::ChannelArgs {
                name: "run_args".to_string(),
                socket_buffer: releasechan_channel::DEFAULT_SOCKET_BUFFER_SIZE,
                producer_timeout: "1s".to_string(),
            },
            count,
            interval: "0".to_string(),
            fence: false,
            max_acquired: 1,
            timeout: "1s".to_string(),
        }
    }

    #[test]
    fn interrupted_partial_run_is_failure() {
        let (consumer, _producer) = open("partial_run").unwrap();
        let reader = ReleaseReader::new(consumer).unwrap();
        let running = AtomicBool::new(false);
        reader.interrupt_blocking_read().unwrap();

        let err = receive_releases(
            &reader,
            &run_args(3),
            Duration::from_secs(1),
            OutputFormat::Json,
            &running,
        )
        .unwrap_err();
        assert_eq!(err.code, FAILURE);
        assert!(err.message.contains("interrupted after 0 of 3"), "{}", err.message);
    }

    #[test]
    fn complete_run_reports_count() {
        let (consumer, producer) = open("complete_run").unwrap();
        let reader = ReleaseReader::new(consumer).unwrap();
        let running = AtomicBool::new(true);
        send_releases(&producer, 2, Duration::ZERO, None, 1, &running).unwrap();

        let received = receive_releases(
            &reader,
            &run_args(2),
            Duration::from_secs(1),
            OutputFormat::Raw,
            &running,
        )
        .unwrap();
        assert_eq!(received, 2);
    }

    #[test]
    fn sender_stops_when_not_running() {
        let (consumer, producer) = open("probe_stop").unwrap();
        let running = AtomicBool::new(false);
        let sent = send_releases(&producer, 5, Duration::ZERO, None, 1, &running).unwrap();
        assert_eq!(sent, 0);
        assert!(consumer.read_release_fence().unwrap().is_none());
    }

    #[test]
    fn sender_numbers_releases_from_zero() {
        let (consumer, producer) = open("probe_numbering").unwrap();
        let running = AtomicBool::new(true);
        let sent = send_releases(&producer, 3, Duration::ZERO, None, 4, &running).unwrap();
        assert_eq!(sent, 3);

        let drained = consumer.drain().unwrap();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[2].release_callback_id, ReleaseCallbackId::new(2, 3));
        assert_eq!(drained[2].max_acquired_buffer_count, 4);
    }
}
