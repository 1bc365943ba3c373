use std::collections::VecDeque;
use std::os::fd::{BorrowedFd, OwnedFd};

use crate::error::Result;

/// Round `n` up to the next multiple of 4.
pub const fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Self-describing conversion to and from `(bytes, descriptors)`.
///
/// Implementors report their encoded size up front so a caller can size a
/// buffer, then write into (or read from) the front of a byte slice.
/// Descriptors are carried in a side list: `flatten` lends them for the
/// duration of a send, `unflatten` takes ownership of the ones it consumes.
pub trait Flattenable: Sized {
    /// Number of bytes `flatten` writes.
    fn flattened_size(&self) -> usize;

    /// Number of descriptors `flatten` appends.
    fn fd_count(&self) -> usize;

    /// Write into the front of `dst`, appending descriptors to `fds`.
    ///
    /// Returns the number of bytes written.
    fn flatten<'a>(&'a self, dst: &mut [u8], fds: &mut Vec<BorrowedFd<'a>>) -> Result<usize>;

    /// Read from the front of `src`, taking descriptors from the front of `fds`.
    ///
    /// Returns the value and the number of bytes consumed.
    fn unflatten(src: &[u8], fds: &mut VecDeque<OwnedFd>) -> Result<(Self, usize)>;
}
