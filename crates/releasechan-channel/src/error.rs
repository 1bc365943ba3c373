use std::io;

use releasechan_frame::FrameError;
use releasechan_transport::TransportError;

/// Status reported for faults that carry no OS error code.
pub const UNKNOWN_ERROR: i32 = i32::MIN;

/// Errors that can occur on a release channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Creating or configuring the channel failed; no endpoint was produced.
    #[error("[{name}] channel setup failed: {source}")]
    Setup {
        name: String,
        #[source]
        source: TransportError,
    },

    /// Sending failed. `EPIPE` means the consumer is gone.
    #[error("channel I/O error: {0}")]
    Io(#[from] io::Error),

    /// Receiving failed, or the ancillary data was malformed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The frame could not be encoded or decoded.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Waiting for readiness failed (`epoll_wait` or the interrupt eventfd).
    #[error("wait failed: {0}")]
    Wait(#[source] io::Error),

    /// The peer closed its end; nothing more will arrive.
    #[error("peer closed the channel")]
    PeerClosed,

    /// A handoff parcel was malformed or read out of order.
    #[error("parcel error: {0}")]
    Parcel(String),

    /// A handoff parcel header could not be (de)serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChannelError {
    /// Status code in negated-errno form.
    ///
    /// OS failures map to `-errno`, an out-of-space encode to `-ENOMEM`, a
    /// malformed fence region to `-EINVAL`, and everything else to
    /// [`UNKNOWN_ERROR`].
    pub fn status(&self) -> i32 {
        match self {
            ChannelError::Setup { source, .. } => negated(source.raw_os_error()),
            ChannelError::Io(err) => negated(err.raw_os_error()),
            ChannelError::Frame(FrameError::OutOfSpace { .. }) => -libc::ENOMEM,
            ChannelError::Frame(_) => -libc::EINVAL,
            ChannelError::Transport(_)
            | ChannelError::Wait(_)
            | ChannelError::PeerClosed
            | ChannelError::Parcel(_)
            | ChannelError::Json(_) => UNKNOWN_ERROR,
        }
    }

    /// Whether a send failed because the consumer end is gone.
    pub fn is_broken_pipe(&self) -> bool {
        match self {
            ChannelError::Io(err) => err.raw_os_error() == Some(libc::EPIPE),
            _ => false,
        }
    }
}

fn negated(errno: Option<i32>) -> i32 {
    errno.map(|e| -e).unwrap_or(UNKNOWN_ERROR)
}

pub type Result<T> = std::result::Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_negates_os_errors() {
        let err = ChannelError::Io(io::Error::from_raw_os_error(libc::EPIPE));
        assert_eq!(err.status(), -libc::EPIPE);
        assert!(err.is_broken_pipe());

        let err = ChannelError::Setup {
            name: "test".to_string(),
            source: TransportError::Socket {
                op: "socketpair",
                source: io::Error::from_raw_os_error(libc::EMFILE),
            },
        };
        assert_eq!(err.status(), -libc::EMFILE);
        assert!(!err.is_broken_pipe());
    }

    #[test]
    fn status_for_frame_and_transport_faults() {
        let out_of_space = ChannelError::Frame(FrameError::OutOfSpace {
            needed: 24,
            available: 8,
        });
        assert_eq!(out_of_space.status(), -libc::ENOMEM);
        assert_eq!(
            ChannelError::Frame(FrameError::MissingFd).status(),
            -libc::EINVAL
        );
        assert_eq!(
            ChannelError::Transport(TransportError::BadFdLength(3)).status(),
            UNKNOWN_ERROR
        );
        assert_eq!(ChannelError::PeerClosed.status(), UNKNOWN_ERROR);

        let wait = ChannelError::Wait(io::Error::from_raw_os_error(libc::EBADF));
        assert_eq!(wait.status(), UNKNOWN_ERROR);
        assert!(!wait.is_broken_pipe());
    }
}
