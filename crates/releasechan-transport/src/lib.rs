//! Local socket plumbing for buffer release channels.
//!
//! Provides the two kernel-facing pieces everything else builds on:
//! - a configured `AF_UNIX`/`SOCK_SEQPACKET` socket pair ([`pair`])
//! - single-message send/receive with `SCM_RIGHTS` descriptor passing ([`msg`])
//!
//! Seqpacket sockets preserve message boundaries, so one send is always
//! exactly one receive and no length prefix is needed on the wire.

pub mod error;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod msg;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod pair;

pub use error::{Result, TransportError};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use msg::{recv_with_fds, send_with_fds, Received};
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use pair::{
    release_socket_pair, seqpacket_pair, SocketConfig, SocketPair, DEFAULT_PRODUCER_RECEIVE_TIMEOUT,
    DEFAULT_SOCKET_BUFFER_SIZE,
};
