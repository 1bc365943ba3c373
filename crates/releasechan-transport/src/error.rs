use std::io;

/// Errors that can occur in socket-level operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A socket creation or configuration call failed.
    #[error("{op} failed: {source}")]
    Socket {
        op: &'static str,
        source: io::Error,
    },

    /// An I/O error occurred while sending or receiving a message.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    /// The ancillary data carried a descriptor payload that is not a whole
    /// number of descriptors.
    #[error("malformed ancillary data ({0} bytes is not a whole number of descriptors)")]
    BadFdLength(usize),
}

impl TransportError {
    /// The underlying OS error code, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            TransportError::Socket { source, .. } | TransportError::Io(source) => {
                source.raw_os_error()
            }
            TransportError::BadFdLength(_) => None,
        }
    }

    /// Whether this is the "no data available right now" outcome of a
    /// non-blocking receive.
    pub fn is_would_block(&self) -> bool {
        matches!(self, TransportError::Io(err) if err.kind() == io::ErrorKind::WouldBlock)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
