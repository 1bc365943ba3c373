use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::time::Duration;

use bytes::{Buf, BufMut};

use crate::error::{FrameError, Result};
use crate::flatten::Flattenable;

/// Size of the encoded fence region: one `u32` descriptor count.
const FENCE_HEADER_SIZE: usize = 4;

/// A synchronization fence, optionally backed by one OS descriptor.
///
/// A fence without a descriptor means "already signaled" (or "no fence").
/// The descriptor is closed when the fence is dropped.
#[derive(Debug, Default)]
pub struct Fence {
    fd: Option<OwnedFd>,
}

impl Fence {
    /// The "no fence" sentinel.
    pub const fn none() -> Self {
        Self { fd: None }
    }

    /// Wrap an owned descriptor.
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd: Some(fd) }
    }

    /// Whether this fence carries a descriptor.
    pub fn is_valid(&self) -> bool {
        self.fd.is_some()
    }

    /// Borrow the descriptor, if any.
    pub fn as_fd(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_ref().map(AsFd::as_fd)
    }

    /// Give up the descriptor, if any.
    pub fn into_fd(self) -> Option<OwnedFd> {
        self.fd
    }

    /// Duplicate the fence (`dup` of the descriptor).
    pub fn try_clone(&self) -> io::Result<Self> {
        match &self.fd {
            Some(fd) => Ok(Self::new(fd.try_clone()?)),
            None => Ok(Self::none()),
        }
    }

    /// Wait up to `timeout` for the fence to signal.
    ///
    /// Returns `true` once signaled (immediately for the "no fence" sentinel)
    /// and `false` if the timeout elapsed first.
    pub fn wait(&self, timeout: Duration) -> io::Result<bool> {
        let Some(fd) = &self.fd else {
            return Ok(true);
        };

        let timeout_ms = libc::c_int::try_from(timeout.as_nanos().div_ceil(1_000_000))
            .unwrap_or(libc::c_int::MAX);
        let mut pfd = libc::pollfd {
            fd: fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        loop {
            // SAFETY: `pfd` is a single valid pollfd for an open descriptor.
            let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            match rc {
                0 => return Ok(false),
                n if n > 0 => {
                    if pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
                        return Err(io::Error::from_raw_os_error(libc::EINVAL));
                    }
                    return Ok(true);
                }
                _ => {
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl From<OwnedFd> for Fence {
    fn from(fd: OwnedFd) -> Self {
        Self::new(fd)
    }
}

impl From<Option<OwnedFd>> for Fence {
    fn from(fd: Option<OwnedFd>) -> Self {
        Self { fd }
    }
}

impl Flattenable for Fence {
    fn flattened_size(&self) -> usize {
        FENCE_HEADER_SIZE
    }

    fn fd_count(&self) -> usize {
        usize::from(self.is_valid())
    }

    fn flatten<'a>(&'a self, dst: &mut [u8], fds: &mut Vec<BorrowedFd<'a>>) -> Result<usize> {
        if dst.len() < FENCE_HEADER_SIZE {
            return Err(FrameError::OutOfSpace {
                needed: FENCE_HEADER_SIZE,
                available: dst.len(),
            });
        }

        let mut header = &mut dst[..FENCE_HEADER_SIZE];
        header.put_u32_ne(self.fd_count() as u32);
        if let Some(fd) = self.as_fd() {
            fds.push(fd);
        }
        Ok(FENCE_HEADER_SIZE)
    }

    fn unflatten(src: &[u8], fds: &mut VecDeque<OwnedFd>) -> Result<(Self, usize)> {
        if src.len() < FENCE_HEADER_SIZE {
            return Err(FrameError::OutOfSpace {
                needed: FENCE_HEADER_SIZE,
                available: src.len(),
            });
        }

        let mut header = &src[..FENCE_HEADER_SIZE];
        let count = header.get_u32_ne();
        let fence = match count {
            0 => Self::none(),
            1 => Self::new(fds.pop_front().ok_or(FrameError::MissingFd)?),
            n => return Err(FrameError::InvalidFdCount(n)),
        };
        Ok((fence, FENCE_HEADER_SIZE))
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use super::*;

    fn file_fence() -> Fence {
        let file = File::open("/dev/null").expect("/dev/null should open");
        Fence::new(OwnedFd::from(file))
    }

    #[test]
    fn no_fence_flattens_zero_count() {
        let fence = Fence::none();
        let mut buf = [0xFFu8; 4];
        let mut fds = Vec::new();

        assert_eq!(fence.flatten(&mut buf, &mut fds).unwrap(), 4);
        assert_eq!(buf, 0u32.to_ne_bytes());
        assert!(fds.is_empty());
        assert_eq!(fence.fd_count(), 0);
    }

    #[test]
    fn valid_fence_flattens_one_fd() {
        let fence = file_fence();
        let mut buf = [0u8; 4];
        let mut fds = Vec::new();

        fence.flatten(&mut buf, &mut fds).unwrap();
        assert_eq!(buf, 1u32.to_ne_bytes());
        assert_eq!(fds.len(), 1);
        assert_eq!(fence.fd_count(), 1);
    }

    #[test]
    fn flatten_rejects_short_buffer() {
        let fence = Fence::none();
        let mut buf = [0u8; 3];
        let err = fence.flatten(&mut buf, &mut Vec::new()).unwrap_err();
        assert_eq!(
            err,
            FrameError::OutOfSpace {
                needed: 4,
                available: 3
            }
        );
    }

    #[test]
    fn unflatten_takes_descriptor() {
        let donor = file_fence().into_fd().unwrap();
        let mut fds = VecDeque::from([donor]);

        let (fence, used) = Fence::unflatten(&1u32.to_ne_bytes(), &mut fds).unwrap();
        assert_eq!(used, 4);
        assert!(fence.is_valid());
        assert!(fds.is_empty());
    }

    #[test]
    fn unflatten_missing_descriptor() {
        let err = Fence::unflatten(&1u32.to_ne_bytes(), &mut VecDeque::new()).unwrap_err();
        assert_eq!(err, FrameError::MissingFd);
    }

    #[test]
    fn unflatten_rejects_multiple_descriptors() {
        let err = Fence::unflatten(&2u32.to_ne_bytes(), &mut VecDeque::new()).unwrap_err();
        assert_eq!(err, FrameError::InvalidFdCount(2));
    }

    #[test]
    fn wait_on_no_fence_is_signaled() {
        assert!(Fence::none().wait(Duration::ZERO).unwrap());
    }

    #[test]
    fn wait_on_readable_descriptor_is_signaled() {
        assert!(file_fence().wait(Duration::from_millis(10)).unwrap());
    }

    #[test]
    fn try_clone_duplicates_descriptor() {
        let fence = file_fence();
        let clone = fence.try_clone().unwrap();
        assert!(clone.is_valid());
        assert_ne!(
            fence.as_fd().unwrap().as_raw_fd(),
            clone.as_fd().unwrap().as_raw_fd()
        );
    }
}
