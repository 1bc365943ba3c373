use releasechan_channel::{DEFAULT_PRODUCER_RECEIVE_TIMEOUT, DEFAULT_SOCKET_BUFFER_SIZE};
use releasechan_frame::POD_SIZE;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("releasechan {}", env!("CARGO_PKG_VERSION"));
    if !args.extended {
        return Ok(SUCCESS);
    }

    println!(
        "target: {}",
        option_env!("RELEASECHAN_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!("features: async={}, cli=true", cfg!(feature = "async"));
    println!("frame_tail_bytes: {POD_SIZE}");
    println!("socket_buffer_default: {DEFAULT_SOCKET_BUFFER_SIZE}");
    println!(
        "producer_receive_timeout_default: {}ms",
        DEFAULT_PRODUCER_RECEIVE_TIMEOUT.as_millis()
    );

    Ok(SUCCESS)
}
