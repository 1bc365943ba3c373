//! Wire codec for buffer release frames.
//!
//! A release frame is a variable-length fence region followed by a fixed
//! 20-byte tail:
//! - the fence region (format owned by [`Fence`]), padded to 4 bytes
//! - `buffer_id` as low word then high word
//! - `frame_number` as low word then high word
//! - `max_acquired_buffer_count`
//!
//! Every field is a native-endian `u32`, so nothing after the fence region
//! needs more than 4-byte alignment. Descriptors travel beside the bytes,
//! never inside them.

pub mod codec;
pub mod error;
pub mod fence;
pub mod flatten;

pub use codec::{
    flatten_release, release_flattened_size, ReleaseCallbackId, ReleaseMessage, POD_SIZE,
};
pub use error::{FrameError, Result};
pub use fence::Fence;
pub use flatten::{align4, Flattenable};
