use std::fs::File;
use std::os::unix::fs::MetadataExt;
use std::time::Duration;

use releasechan_channel::{open, BlockingRead, Fence, ReleaseCallbackId, ReleaseReader};
use serde::Serialize;

use crate::cmd::{file_fence, DoctorArgs};
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(_args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let checks = vec![
        socket_pair_check(),
        fd_passing_check(),
        blocking_reader_check(),
        socket_buffer_env_check(),
        compiled_features_check(),
    ];

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let output = DoctorOutput {
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("releasechan doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<18} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => println!("{}", output.overall),
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}

fn socket_pair_check() -> CheckResult {
    match open("doctor") {
        Ok(_) => CheckResult::new(
            "socket_pair",
            CheckStatus::Pass,
            "seqpacket socket pair configured",
        ),
        Err(err) => CheckResult::new("socket_pair", CheckStatus::Fail, err.to_string()),
    }
}

fn fd_passing_check() -> CheckResult {
    const NAME: &str = "fd_passing";

    let result = (|| -> Result<bool, String> {
        let fence = file_fence().map_err(|err| err.to_string())?;
        let (consumer, producer) = open("doctor").map_err(|err| err.to_string())?;
        producer
            .write_release_fence(ReleaseCallbackId::new(1, 1), Some(&fence), 1)
            .map_err(|err| err.to_string())?;
        let message = consumer
            .read_release_fence()
            .map_err(|err| err.to_string())?
            .ok_or_else(|| "release did not arrive".to_string())?;
        Ok(file_identity(&fence) == file_identity(&message.release_fence)
            && file_identity(&fence).is_some())
    })();

    match result {
        Ok(true) => CheckResult::new(NAME, CheckStatus::Pass, "SCM_RIGHTS fence round trip"),
        Ok(false) => CheckResult::new(
            NAME,
            CheckStatus::Fail,
            "received fence refers to a different file",
        ),
        Err(detail) => CheckResult::new(NAME, CheckStatus::Fail, detail),
    }
}

fn file_identity(fence: &Fence) -> Option<(u64, u64)> {
    let fd = fence.as_fd()?.try_clone_to_owned().ok()?;
    let meta = File::from(fd).metadata().ok()?;
    Some((meta.dev(), meta.ino()))
}

fn blocking_reader_check() -> CheckResult {
    const NAME: &str = "blocking_reader";

    let result = (|| -> Result<(), String> {
        let (consumer, _producer) = open("doctor").map_err(|err| err.to_string())?;
        let reader = ReleaseReader::new(consumer).map_err(|err| err.to_string())?;
        reader
            .interrupt_blocking_read()
            .map_err(|err| err.to_string())?;
        match reader.read_blocking(Duration::from_secs(1)) {
            Ok(BlockingRead::WouldBlock) => Ok(()),
            Ok(other) => Err(format!("interrupt not observed: {other:?}")),
            Err(err) => Err(err.to_string()),
        }
    })();

    match result {
        Ok(()) => CheckResult::new(NAME, CheckStatus::Pass, "epoll and eventfd interrupt"),
        Err(detail) => CheckResult::new(NAME, CheckStatus::Fail, detail),
    }
}

fn socket_buffer_env_check() -> CheckResult {
    const NAME: &str = "socket_buffer_env";

    match std::env::var("RELEASECHAN_SOCKET_BUFFER") {
        Err(_) => CheckResult::new(NAME, CheckStatus::Skip, "RELEASECHAN_SOCKET_BUFFER not set"),
        Ok(value) => match value.parse::<usize>() {
            Ok(size) if size > 0 && size <= i32::MAX as usize => {
                CheckResult::new(NAME, CheckStatus::Pass, format!("{size} bytes"))
            }
            _ => CheckResult::new(
                NAME,
                CheckStatus::Fail,
                format!("invalid RELEASECHAN_SOCKET_BUFFER: {value}"),
            ),
        },
    }
}

fn compiled_features_check() -> CheckResult {
    let mut features = vec!["cli"];
    if cfg!(feature = "async") {
        features.push("async");
    }
    CheckResult::new("compiled_features", CheckStatus::Info, features.join(", "))
}
