use std::collections::VecDeque;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::{Mutex, MutexGuard, PoisonError};

use releasechan_frame::{
    flatten_release, release_flattened_size, Fence, Flattenable, ReleaseCallbackId,
    ReleaseMessage,
};
use releasechan_transport::{recv_with_fds, send_with_fds};
use tracing::{error, trace};

use crate::error::{ChannelError, Result};
use crate::parcel::Parcel;

/// Descriptors accepted per received frame.
const MAX_FDS_PER_FRAME: usize = 1;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The read side of a release channel.
///
/// Its socket is non-blocking and shut down for writing. Reads go through
/// `&self`, but only one logical owner (an event loop or a
/// [`ReleaseReader`](crate::ReleaseReader)) should read at a time.
#[derive(Debug)]
pub struct ConsumerEndpoint {
    name: String,
    fd: OwnedFd,
    buf: Mutex<Vec<u8>>,
}

impl ConsumerEndpoint {
    /// Wrap an already configured consumer socket.
    pub fn new(name: impl Into<String>, fd: OwnedFd) -> Self {
        Self {
            name: name.into(),
            fd,
            buf: Mutex::new(Vec::new()),
        }
    }

    /// Diagnostic channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read one release without blocking.
    ///
    /// Returns `Ok(None)` when nothing is queued; call again once the
    /// descriptor is readable. Any other receive failure, a malformed
    /// descriptor payload, or an empty message (the producer hung up) is an
    /// error.
    pub fn read_release_fence(&self) -> Result<Option<ReleaseMessage>> {
        let mut buf = lock(&self.buf);
        buf.clear();
        buf.resize(ReleaseMessage::default().flattened_size(), 0);

        let received = match recv_with_fds(self.fd.as_fd(), &mut buf, MAX_FDS_PER_FRAME) {
            Ok(received) => received,
            Err(err) if err.is_would_block() => return Ok(None),
            Err(err) => {
                error!(channel = %self.name, %err, "error reading release fence from socket");
                return Err(err.into());
            }
        };

        if received.len == 0 {
            error!(channel = %self.name, "error reading release fence from socket: no buffer data");
            return Err(ChannelError::PeerClosed);
        }

        let mut fds = VecDeque::from(received.fds);
        let (message, _) = ReleaseMessage::unflatten(&buf[..received.len], &mut fds)?;
        trace!(
            channel = %self.name,
            id = %message.release_callback_id,
            fence = message.release_fence.is_valid(),
            max_acquired = message.max_acquired_buffer_count,
            "read release fence"
        );
        Ok(Some(message))
    }

    /// Read every release currently queued, stopping at the first would-block.
    pub fn drain(&self) -> Result<Vec<ReleaseMessage>> {
        let mut released = Vec::new();
        while let Some(message) = self.read_release_fence()? {
            released.push(message);
        }
        Ok(released)
    }
}

impl AsFd for ConsumerEndpoint {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for ConsumerEndpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// The write side of a release channel.
///
/// There is logically one sender, but several call sites may share it
/// through an `Arc`.
#[derive(Debug)]
pub struct ProducerEndpoint {
    name: String,
    fd: OwnedFd,
    buf: Mutex<Vec<u8>>,
}

impl ProducerEndpoint {
    /// Wrap an already configured producer socket.
    pub fn new(name: impl Into<String>, fd: OwnedFd) -> Self {
        Self {
            name: name.into(),
            fd,
            buf: Mutex::new(Vec::new()),
        }
    }

    /// Diagnostic channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send one release.
    ///
    /// `None` is sent as the "no fence" sentinel. A valid fence's descriptor
    /// rides along as `SCM_RIGHTS`; the caller keeps its own copy. Blocks
    /// only while the socket buffer is full. A consumer that has gone away
    /// surfaces as [`ChannelError::Io`] with `EPIPE`
    /// (see [`ChannelError::is_broken_pipe`]).
    pub fn write_release_fence(
        &self,
        release_callback_id: ReleaseCallbackId,
        release_fence: Option<&Fence>,
        max_acquired_buffer_count: u32,
    ) -> Result<()> {
        let no_fence = Fence::none();
        let fence = release_fence.unwrap_or(&no_fence);

        let mut buf = lock(&self.buf);
        buf.clear();
        buf.resize(release_flattened_size(fence), 0);

        let mut fds = Vec::with_capacity(MAX_FDS_PER_FRAME);
        let len = flatten_release(
            release_callback_id,
            fence,
            max_acquired_buffer_count,
            &mut buf,
            &mut fds,
        )?;

        send_with_fds(self.fd.as_fd(), &buf[..len], &fds)?;
        trace!(
            channel = %self.name,
            id = %release_callback_id,
            fence = !fds.is_empty(),
            max_acquired = max_acquired_buffer_count,
            "wrote release fence"
        );
        Ok(())
    }

    /// Write this endpoint into a handoff parcel as `(name, dup(fd))`.
    pub fn write_to_parcel(&self, parcel: &mut Parcel) -> Result<()> {
        parcel.write_utf8(&self.name);
        parcel.write_fd(self.fd.as_fd())
    }

    /// Rebuild an endpoint from a parcel written by [`write_to_parcel`](Self::write_to_parcel).
    pub fn read_from_parcel(parcel: &mut Parcel) -> Result<Self> {
        let name = parcel.read_utf8()?;
        let fd = parcel.read_fd()?;
        Ok(Self::new(name, fd))
    }
}

impl AsFd for ProducerEndpoint {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
