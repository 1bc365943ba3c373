use std::io;
use std::mem::size_of;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use tracing::trace;

use crate::error::{Result, TransportError};

const FD_SIZE: usize = size_of::<libc::c_int>();

/// One received message: payload length plus any descriptors that came with it.
#[derive(Debug)]
pub struct Received {
    /// Number of payload bytes written into the caller's buffer.
    pub len: usize,
    /// Descriptors received via `SCM_RIGHTS`, already owned by this process.
    pub fds: Vec<OwnedFd>,
    /// The payload was larger than the buffer and the tail was discarded.
    pub truncated: bool,
}

/// Control buffer sized and aligned for `count` descriptors.
///
/// Backed by `u64` words so the buffer satisfies `cmsghdr` alignment.
fn control_buffer(count: usize) -> (Vec<u64>, usize) {
    if count == 0 {
        return (Vec::new(), 0);
    }
    // SAFETY: CMSG_SPACE only computes a size.
    let space = unsafe { libc::CMSG_SPACE((count * FD_SIZE) as libc::c_uint) } as usize;
    (vec![0u64; space.div_ceil(size_of::<u64>())], space)
}

/// Send one message carrying `payload` and, as ancillary data, `fds`.
///
/// Blocks according to the socket's mode. Retries only on `EINTR`. The
/// descriptors are duplicated into the receiver by the kernel; the caller
/// keeps ownership of its copies. `EPIPE` is returned (not raised as a
/// signal) once the peer has gone away.
pub fn send_with_fds(
    sock: BorrowedFd<'_>,
    payload: &[u8],
    fds: &[BorrowedFd<'_>],
) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: payload.as_ptr() as *mut libc::c_void,
        iov_len: payload.len(),
    };
    let (mut control, space) = control_buffer(fds.len());

    // SAFETY: an all-zero msghdr is a valid "no name, no iov, no control" header.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    if !fds.is_empty() {
        msg.msg_control = control.as_mut_ptr().cast::<libc::c_void>();
        msg.msg_controllen = space as _;

        // SAFETY: the control buffer is `space` bytes, aligned for cmsghdr, and large
        // enough for one header plus `fds.len()` ints, so CMSG_FIRSTHDR is non-null and
        // CMSG_DATA points at `fds.len()` writable ints.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN((fds.len() * FD_SIZE) as libc::c_uint) as _;
            let data = libc::CMSG_DATA(cmsg).cast::<libc::c_int>();
            for (i, fd) in fds.iter().enumerate() {
                data.add(i).write_unaligned(fd.as_raw_fd());
            }
        }
    }

    loop {
        // SAFETY: `msg` points at live iov/control buffers for the duration of the call.
        let rc = unsafe { libc::sendmsg(sock.as_raw_fd(), &msg, libc::MSG_NOSIGNAL) };
        if rc >= 0 {
            trace!(bytes = rc, fds = fds.len(), "sent message");
            return Ok(rc as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return Err(err);
    }
}

/// Receive one message into `buf`, accepting up to `max_fds` descriptors.
///
/// Performs a single `recvmsg` (retrying only on `EINTR`); whether it blocks
/// depends on the socket's mode. On a non-blocking socket with nothing queued
/// the error satisfies [`TransportError::is_would_block`]. Received
/// descriptors are close-on-exec and owned by the returned value, so they are
/// closed if the caller drops it.
pub fn recv_with_fds(sock: BorrowedFd<'_>, buf: &mut [u8], max_fds: usize) -> Result<Received> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast::<libc::c_void>(),
        iov_len: buf.len(),
    };
    let (mut control, space) = control_buffer(max_fds);

    // SAFETY: an all-zero msghdr is a valid "no name, no iov, no control" header.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    if space > 0 {
        msg.msg_control = control.as_mut_ptr().cast::<libc::c_void>();
        msg.msg_controllen = space as _;
    }

    let len = loop {
        // SAFETY: `msg` points at live, writable iov/control buffers for the call.
        let rc = unsafe { libc::recvmsg(sock.as_raw_fd(), &mut msg, libc::MSG_CMSG_CLOEXEC) };
        if rc >= 0 {
            break rc as usize;
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return Err(TransportError::Io(err));
    };

    let mut fds = Vec::new();
    let mut bad_length = None;

    // SAFETY: after a successful recvmsg the control buffer holds `msg_controllen`
    // bytes of well-formed cmsg headers, which CMSG_FIRSTHDR/CMSG_NXTHDR walk. Every
    // SCM_RIGHTS payload int is a descriptor newly installed in this process, so it is
    // taken into an OwnedFd exactly once.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data_len =
                    ((*cmsg).cmsg_len as usize).saturating_sub(libc::CMSG_LEN(0) as usize);
                let data = libc::CMSG_DATA(cmsg).cast::<libc::c_int>();
                for i in 0..data_len / FD_SIZE {
                    fds.push(OwnedFd::from_raw_fd(data.add(i).read_unaligned()));
                }
                if data_len % FD_SIZE != 0 {
                    bad_length = Some(data_len);
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    if let Some(data_len) = bad_length {
        return Err(TransportError::BadFdLength(data_len));
    }

    let truncated = msg.msg_flags & libc::MSG_TRUNC != 0;
    trace!(bytes = len, fds = fds.len(), truncated, "received message");

    Ok(Received {
        len,
        fds,
        truncated,
    })
}
