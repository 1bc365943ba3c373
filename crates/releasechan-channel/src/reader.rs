use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use std::time::{Duration, Instant};

use releasechan_frame::ReleaseMessage;
use tracing::{debug, error};

use crate::endpoint::ConsumerEndpoint;
use crate::error::{ChannelError, Result};

const CONSUMER_TOKEN: u64 = 1;
const INTERRUPT_TOKEN: u64 = 2;

/// Outcome of [`ReleaseReader::read_blocking`].
#[derive(Debug)]
pub enum BlockingRead {
    /// A release arrived and was decoded.
    Released(ReleaseMessage),
    /// The wait was interrupted, or woke without a complete message.
    WouldBlock,
    /// Nothing happened before the timeout.
    TimedOut,
}

impl BlockingRead {
    /// The decoded release, if any.
    pub fn released(self) -> Option<ReleaseMessage> {
        match self {
            BlockingRead::Released(message) => Some(message),
            _ => None,
        }
    }
}

/// Cloneable handle that wakes a blocked [`ReleaseReader`] from any thread.
#[derive(Debug, Clone)]
pub struct Interrupter {
    event: Arc<OwnedFd>,
}

impl Interrupter {
    fn new() -> io::Result<Self> {
        // SAFETY: plain syscall, flags are valid.
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: eventfd succeeded, so `fd` is open and owned by us.
        let event = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            event: Arc::new(event),
        })
    }

    /// Signal the reader. Signals raised before anyone drains them coalesce.
    pub fn interrupt(&self) -> io::Result<()> {
        let value = 1u64.to_ne_bytes();
        loop {
            // SAFETY: writes exactly 8 bytes from a live stack buffer.
            let rc = unsafe {
                libc::write(
                    self.event.as_raw_fd(),
                    value.as_ptr().cast::<libc::c_void>(),
                    value.len(),
                )
            };
            if rc >= 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                // Counter saturated; the reader is already signaled.
                io::ErrorKind::WouldBlock => return Ok(()),
                _ => return Err(err),
            }
        }
    }

    /// Drain any pending signal.
    pub fn clear(&self) -> io::Result<()> {
        let mut value = [0u8; 8];
        loop {
            // SAFETY: reads at most 8 bytes into a live stack buffer.
            let rc = unsafe {
                libc::read(
                    self.event.as_raw_fd(),
                    value.as_mut_ptr().cast::<libc::c_void>(),
                    value.len(),
                )
            };
            if rc >= 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return Ok(()),
                _ => return Err(err),
            }
        }
    }

    fn as_fd(&self) -> BorrowedFd<'_> {
        self.event.as_fd()
    }
}

/// Lets one dedicated thread block until a release arrives, an interrupt
/// fires, or a timeout elapses.
///
/// Only one `read_blocking` call may be outstanding at a time.
/// [`interrupt_blocking_read`](Self::interrupt_blocking_read) and
/// [`clear_interrupts`](Self::clear_interrupts) may be called from any
/// thread while it is blocked, as may the handle returned by
/// [`interrupter`](Self::interrupter).
#[derive(Debug)]
pub struct ReleaseReader {
    consumer: ConsumerEndpoint,
    epoll: OwnedFd,
    interrupter: Interrupter,
}

impl ReleaseReader {
    /// Build a reader that takes ownership of `consumer`.
    pub fn new(consumer: ConsumerEndpoint) -> Result<Self> {
        // SAFETY: plain syscall, flags are valid.
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd == -1 {
            let err = io::Error::last_os_error();
            error!(channel = consumer.name(), %err, "failed to create epoll instance");
            return Err(err.into());
        }
        // SAFETY: epoll_create1 succeeded, so `fd` is open and owned by us.
        let epoll = unsafe { OwnedFd::from_raw_fd(fd) };

        let interrupter = Interrupter::new().map_err(|err| {
            error!(channel = consumer.name(), %err, "failed to create interrupt eventfd");
            err
        })?;

        register(epoll.as_fd(), consumer.as_fd(), CONSUMER_TOKEN)?;
        register(epoll.as_fd(), interrupter.as_fd(), INTERRUPT_TOKEN)?;

        debug!(channel = consumer.name(), "created release reader");
        Ok(Self {
            consumer,
            epoll,
            interrupter,
        })
    }

    /// The wrapped consumer endpoint.
    pub fn consumer(&self) -> &ConsumerEndpoint {
        &self.consumer
    }

    /// Give the consumer endpoint back, closing the epoll and eventfd.
    pub fn into_consumer(self) -> ConsumerEndpoint {
        self.consumer
    }

    /// A handle that can interrupt this reader from another thread.
    pub fn interrupter(&self) -> Interrupter {
        self.interrupter.clone()
    }

    /// Block for at most `timeout` waiting for one release.
    ///
    /// A pending interrupt wins over pending data: it is consumed and the
    /// call returns [`BlockingRead::WouldBlock`]. The timeout is rounded up
    /// to whole milliseconds; `Duration::ZERO` polls once without waiting.
    pub fn read_blocking(&self, timeout: Duration) -> Result<BlockingRead> {
        let deadline = Instant::now().checked_add(timeout);
        let mut remaining = timeout;

        loop {
            let mut events = [libc::epoll_event { events: 0, u64: 0 }; 2];
            // SAFETY: `events` has room for the two registered descriptors.
            let rc = unsafe {
                libc::epoll_wait(
                    self.epoll.as_raw_fd(),
                    events.as_mut_ptr(),
                    events.len() as libc::c_int,
                    timeout_millis(remaining),
                )
            };

            if rc == -1 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    remaining = match deadline {
                        Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                        None => remaining,
                    };
                    continue;
                }
                error!(channel = self.consumer.name(), %err, "epoll_wait failed");
                return Err(ChannelError::Wait(err));
            }

            let ready = &events[..rc as usize];
            if ready.is_empty() {
                return Ok(BlockingRead::TimedOut);
            }

            let interrupted = ready.iter().any(|event| {
                let token = event.u64;
                token == INTERRUPT_TOKEN
            });
            if interrupted {
                self.interrupter.clear().map_err(|err| {
                    error!(channel = self.consumer.name(), %err, "failed to drain interrupt");
                    ChannelError::Wait(err)
                })?;
                return Ok(BlockingRead::WouldBlock);
            }

            return match self.consumer.read_release_fence()? {
                Some(message) => Ok(BlockingRead::Released(message)),
                None => Ok(BlockingRead::WouldBlock),
            };
        }
    }

    /// Wake the current (or next) `read_blocking` call.
    pub fn interrupt_blocking_read(&self) -> Result<()> {
        self.interrupter.interrupt().map_err(|err| {
            error!(channel = self.consumer.name(), %err, "failed to signal interrupt");
            err.into()
        })
    }

    /// Discard any pending interrupt so later waits block normally.
    pub fn clear_interrupts(&self) -> Result<()> {
        self.interrupter.clear().map_err(|err| {
            error!(channel = self.consumer.name(), %err, "failed to clear interrupts");
            err.into()
        })
    }
}

fn register(epoll: BorrowedFd<'_>, fd: BorrowedFd<'_>, token: u64) -> io::Result<()> {
    let mut event = libc::epoll_event {
        events: libc::EPOLLIN as u32,
        u64: token,
    };
    // SAFETY: both descriptors are open and `event` outlives the call.
    let rc = unsafe {
        libc::epoll_ctl(
            epoll.as_raw_fd(),
            libc::EPOLL_CTL_ADD,
            fd.as_raw_fd(),
            &mut event,
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn timeout_millis(timeout: Duration) -> libc::c_int {
    libc::c_int::try_from(timeout.as_nanos().div_ceil(1_000_000)).unwrap_or(libc::c_int::MAX)
}
