//! Buffer release channel: a one-way "this buffer is free" notification
//! path from a display compositor to a buffer-producing client.
//!
//! Each release travels as one `SOCK_SEQPACKET` message holding a small
//! fixed frame and, when present, the release fence descriptor passed as
//! `SCM_RIGHTS`.
//!
//! # Crate Structure
//!
//! - [`transport`]: socket pair setup and descriptor-passing send/receive
//! - [`frame`]: the release frame codec and the `Fence` type
//! - [`channel`]: endpoints, the cancellable blocking reader, and the
//!   handoff `Parcel`
//!
//! ```no_run
//! use std::time::Duration;
//! use releasechan::channel::{open, BlockingRead, ReleaseCallbackId, ReleaseReader};
//!
//! let (consumer, producer) = open("surface-1")?;
//! let reader = ReleaseReader::new(consumer)?;
//!
//! producer.write_release_fence(ReleaseCallbackId::new(7, 42), None, 2)?;
//! if let BlockingRead::Released(message) = reader.read_blocking(Duration::from_millis(100))? {
//!     assert_eq!(message.release_callback_id.frame_number, 42);
//! }
//! # Ok::<(), releasechan::channel::ChannelError>(())
//! ```

/// Re-export transport types.
pub mod transport {
    pub use releasechan_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use releasechan_frame::*;
}

/// Re-export channel types.
pub mod channel {
    pub use releasechan_channel::*;
}
