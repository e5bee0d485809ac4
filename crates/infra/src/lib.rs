//! Infrastructure layer: storage collaborators and the channel built on them.

pub mod channel;
pub mod error;
pub mod provisioner;
pub mod publisher;
pub mod shutdown;
pub mod storage;
pub mod subscriber;

#[cfg(test)]
pub(crate) mod testing;


pub use channel::{Channel, ChannelState, WeakChannel};
pub use error::ChannelError;
pub use provisioner::CollectionProvisioner;
pub use publisher::Publisher;
pub use shutdown::ShutdownCoordinator;
pub use storage::{
    Collection, CollectionOptions, Connector, Database, InMemoryStorage, StorageError, TailCursor,
};
pub use subscriber::{MessageSink, Subscriber, SubscriberHandle};
