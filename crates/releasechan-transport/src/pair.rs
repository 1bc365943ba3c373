use std::io;
use std::mem::size_of;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};

/// Default send/receive buffer size for both ends of a release socket pair.
///
/// Kernel defaults are typically ~128 KiB, far more than a release frame
/// stream ever needs.
pub const DEFAULT_SOCKET_BUFFER_SIZE: usize = 32 * 1024;

/// Default `SO_RCVTIMEO` applied to the producer end.
pub const DEFAULT_PRODUCER_RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Socket options applied by [`release_socket_pair`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConfig {
    /// `SO_SNDBUF` and `SO_RCVBUF` for both ends. Default: 32 KiB.
    pub socket_buffer_size: usize,
    /// `SO_RCVTIMEO` for the producer end. Default: 1 second.
    pub producer_receive_timeout: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            socket_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
            producer_receive_timeout: DEFAULT_PRODUCER_RECEIVE_TIMEOUT,
        }
    }
}

/// The two configured halves of a release channel.
#[derive(Debug)]
pub struct SocketPair {
    /// Read side: non-blocking, shut down for writing.
    pub consumer: OwnedFd,
    /// Write side: blocking, with a receive timeout.
    pub producer: OwnedFd,
}

/// Create a connected, close-on-exec `AF_UNIX`/`SOCK_SEQPACKET` pair.
pub fn seqpacket_pair() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds = [-1; 2];
    // SAFETY: `fds` is a valid writable array of two ints as required by socketpair(2).
    let rc = unsafe {
        libc::socketpair(
            libc::AF_UNIX,
            libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC,
            0,
            fds.as_mut_ptr(),
        )
    };
    if rc == -1 {
        return Err(TransportError::Socket {
            op: "socketpair",
            source: io::Error::last_os_error(),
        });
    }

    // SAFETY: socketpair succeeded, so both descriptors are open and owned by us.
    let pair = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    Ok(pair)
}

/// Create and configure the socket pair backing one release channel.
///
/// Any failing step drops (and so closes) both descriptors; there is no
/// partially configured pair.
pub fn release_socket_pair(config: &SocketConfig) -> Result<SocketPair> {
    let (consumer, producer) = seqpacket_pair()?;

    let buffer_size = libc::c_int::try_from(config.socket_buffer_size).map_err(|_| {
        TransportError::Socket {
            op: "setsockopt(SO_SNDBUF)",
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("socket buffer size {} too large", config.socket_buffer_size),
            ),
        }
    })?;

    for fd in [consumer.as_fd(), producer.as_fd()] {
        set_int_option(fd, libc::SO_SNDBUF, buffer_size, "setsockopt(SO_SNDBUF)")?;
        set_int_option(fd, libc::SO_RCVBUF, buffer_size, "setsockopt(SO_RCVBUF)")?;
    }

    set_nonblocking(consumer.as_fd())?;
    set_receive_timeout(producer.as_fd(), config.producer_receive_timeout)?;
    shutdown_write(consumer.as_fd())?;

    debug!(
        consumer = consumer.as_raw_fd(),
        producer = producer.as_raw_fd(),
        buffer_size,
        "created release socket pair"
    );

    Ok(SocketPair { consumer, producer })
}

fn set_int_option(
    fd: BorrowedFd<'_>,
    option: libc::c_int,
    value: libc::c_int,
    op: &'static str,
) -> Result<()> {
    // SAFETY: `value` is a valid c_int and the length matches its size.
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            option,
            (&value as *const libc::c_int).cast::<libc::c_void>(),
            size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == -1 {
        return Err(TransportError::Socket {
            op,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

fn set_nonblocking(fd: BorrowedFd<'_>) -> Result<()> {
    // SAFETY: F_GETFL takes no argument and `fd` is open.
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL, 0) };
    if flags == -1 {
        return Err(TransportError::Socket {
            op: "fcntl(F_GETFL)",
            source: io::Error::last_os_error(),
        });
    }
    // SAFETY: F_SETFL takes an int flag set and `fd` is open.
    let rc = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc == -1 {
        return Err(TransportError::Socket {
            op: "fcntl(F_SETFL)",
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

fn set_receive_timeout(fd: BorrowedFd<'_>, timeout: Duration) -> Result<()> {
    let tv = libc::timeval {
        tv_sec: libc::time_t::try_from(timeout.as_secs()).unwrap_or(libc::time_t::MAX),
        tv_usec: libc::suseconds_t::from(timeout.subsec_micros() as i32),
    };
    // SAFETY: `tv` is a valid timeval and the length matches its size.
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            (&tv as *const libc::timeval).cast::<libc::c_void>(),
            size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if rc == -1 {
        return Err(TransportError::Socket {
            op: "setsockopt(SO_RCVTIMEO)",
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

fn shutdown_write(fd: BorrowedFd<'_>) -> Result<()> {
    // SAFETY: `fd` is an open socket descriptor.
    let rc = unsafe { libc::shutdown(fd.as_raw_fd(), libc::SHUT_WR) };
    if rc == -1 {
        return Err(TransportError::Socket {
            op: "shutdown(SHUT_WR)",
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Read an integer `SOL_SOCKET` option (e.g. `SO_SNDBUF`).
pub fn int_option(fd: BorrowedFd<'_>, option: libc::c_int) -> io::Result<libc::c_int> {
    let mut value: libc::c_int = 0;
    let mut len = size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: `value` and `len` are valid writable pointers for the provided sizes.
    let rc = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            option,
            (&mut value as *mut libc::c_int).cast::<libc::c_void>(),
            &mut len,
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(value)
}

/// Read the `SO_RCVTIMEO` of a socket.
pub fn receive_timeout(fd: BorrowedFd<'_>) -> io::Result<Duration> {
    let mut tv = libc::timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    let mut len = size_of::<libc::timeval>() as libc::socklen_t;
    // SAFETY: `tv` and `len` are valid writable pointers for the provided sizes.
    let rc = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            (&mut tv as *mut libc::timeval).cast::<libc::c_void>(),
            &mut len,
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    let secs = u64::try_from(tv.tv_sec).unwrap_or(0);
    let micros = u32::try_from(tv.tv_usec).unwrap_or(0);
    Ok(Duration::from_secs(secs) + Duration::from_micros(u64::from(micros)))
}

/// Whether `O_NONBLOCK` is set on a descriptor.
pub fn is_nonblocking(fd: BorrowedFd<'_>) -> io::Result<bool> {
    // SAFETY: F_GETFL takes no argument and `fd` is open.
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL, 0) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(flags & libc::O_NONBLOCK != 0)
}
