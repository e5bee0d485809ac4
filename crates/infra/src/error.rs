use thiserror::Error;

use tailcast_core::ConfigError;

use crate::storage::StorageError;

/// Channel operation error.
///
/// ## Propagation
///
/// - **Config** and **Provisioning** reject `Channel::open` outright.
/// - **Publish** and **Payload** reject only the `emit` call that raised them.
/// - **Tail** is never returned; it is dispatched to the channel's error
///   listeners so one failed read does not tear down a long-lived subscriber.
/// - **Shutdown** is returned by `close` after release has still completed.
/// - **Closed** rejects operations on a channel that is closing or closed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("collection provisioning failed: {0}")]
    Provisioning(#[source] StorageError),

    #[error("publish failed: {0}")]
    Publish(#[source] StorageError),

    #[error("payload could not be encoded: {0}")]
    Payload(String),

    #[error("tail failed: {0}")]
    Tail(#[source] StorageError),

    #[error("resource release failed during close: {0}")]
    Shutdown(#[source] StorageError),

    #[error("channel is closed")]
    Closed,
}
