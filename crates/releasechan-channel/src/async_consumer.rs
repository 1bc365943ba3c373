use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

use crate::endpoint::ConsumerEndpoint;
use crate::error::Result;
use releasechan_frame::ReleaseMessage;

/// A consumer endpoint registered with the tokio reactor.
///
/// Must be created inside a tokio runtime.
#[derive(Debug)]
pub struct AsyncConsumer {
    inner: AsyncFd<ConsumerEndpoint>,
}

impl AsyncConsumer {
    pub fn new(consumer: ConsumerEndpoint) -> Result<Self> {
        let inner = AsyncFd::with_interest(consumer, Interest::READABLE)?;
        Ok(Self { inner })
    }

    /// Wait for the next release.
    pub async fn read_release_fence(&self) -> Result<ReleaseMessage> {
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.get_inner().read_release_fence()? {
                Some(message) => return Ok(message),
                None => guard.clear_ready(),
            }
        }
    }

    pub fn get_ref(&self) -> &ConsumerEndpoint {
        self.inner.get_ref()
    }

    /// Deregister from the reactor and return the endpoint.
    pub fn into_inner(self) -> ConsumerEndpoint {
        self.inner.into_inner()
    }
}
