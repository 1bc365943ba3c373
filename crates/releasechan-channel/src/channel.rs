use releasechan_transport::{release_socket_pair, SocketConfig};
use tracing::{debug, error};

use crate::endpoint::{ConsumerEndpoint, ProducerEndpoint};
use crate::error::{ChannelError, Result};

/// Open a release channel with the default socket configuration.
pub fn open(name: impl Into<String>) -> Result<(ConsumerEndpoint, ProducerEndpoint)> {
    open_with_config(name, &SocketConfig::default())
}

/// Open a release channel with explicit socket configuration.
///
/// Both endpoints get the same diagnostic `name`. On failure no descriptor
/// is left open.
pub fn open_with_config(
    name: impl Into<String>,
    config: &SocketConfig,
) -> Result<(ConsumerEndpoint, ProducerEndpoint)> {
    let name = name.into();
    let pair = release_socket_pair(config).map_err(|source| {
        error!(channel = %name, %source, "failed to create release channel");
        ChannelError::Setup {
            name: name.clone(),
            source,
        }
    })?;

    debug!(
        channel = %name,
        buffer_size = config.socket_buffer_size,
        "opened release channel"
    );

    Ok((
        ConsumerEndpoint::new(name.clone(), pair.consumer),
        ProducerEndpoint::new(name, pair.producer),
    ))
}
