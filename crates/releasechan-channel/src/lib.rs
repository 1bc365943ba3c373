//! Buffer release channel: the compositor-to-client "this buffer is free"
//! notification path.
//!
//! [`open`] creates one [`ProducerEndpoint`] (kept by the compositor) and one
//! [`ConsumerEndpoint`] (handed to the client). Each release is one
//! seqpacket message carrying a [`ReleaseMessage`] frame and, when the fence
//! is valid, its descriptor.
//!
//! Clients either poll the consumer from their own event loop, await it via
//! `AsyncConsumer` (behind the `async` feature), or park a dedicated thread
//! in a [`ReleaseReader`], which can be woken early from any thread.

pub mod channel;
pub mod endpoint;
pub mod error;
pub mod parcel;
pub mod reader;

#[cfg(feature = "async")]
pub mod async_consumer;

#[cfg(feature = "async")]
pub use async_consumer::AsyncConsumer;
pub use channel::{open, open_with_config};
pub use endpoint::{ConsumerEndpoint, ProducerEndpoint};
pub use error::{ChannelError, Result, UNKNOWN_ERROR};
pub use parcel::Parcel;
pub use reader::{BlockingRead, Interrupter, ReleaseReader};

pub use releasechan_frame::{Fence, ReleaseCallbackId, ReleaseMessage};
pub use releasechan_transport::{
    SocketConfig, DEFAULT_PRODUCER_RECEIVE_TIMEOUT, DEFAULT_SOCKET_BUFFER_SIZE,
};
