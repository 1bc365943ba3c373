/// Errors that can occur while flattening or unflattening a frame.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    /// The destination (or source) region is smaller than the field being
    /// written (or read).
    #[error("out of space ({needed} bytes needed, {available} available)")]
    OutOfSpace { needed: usize, available: usize },

    /// The fence region declares more descriptors than a fence can own.
    #[error("invalid fence descriptor count {0} (expected 0 or 1)")]
    InvalidFdCount(u32),

    /// The fence region declares a descriptor but none was delivered.
    #[error("fence descriptor missing from ancillary data")]
    MissingFd,
}

pub type Result<T> = std::result::Result<T, FrameError>;
