use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use tailcast_core::Message;

/// Options for creating a topic's collection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CollectionOptions {
    /// Maximum size in bytes; fixed for the collection's lifetime.
    pub size: u64,
    pub capped: bool,
}

impl CollectionOptions {
    pub fn capped(size: u64) -> Self {
        Self { size, capped: true }
    }
}

/// Storage collaborator error.
///
/// ## Error Categories
///
/// - **AlreadyExists**: the collection name is taken (benign on first-use races)
/// - **Connection**: the target could not be reached or the handle is unusable
/// - **Command**: the storage rejected an operation (permissions, invalid size, ...)
/// - **Serialization**: a message could not be encoded or decoded
/// - **CursorLost**: a tail fell behind the retained part of the log
/// - **Closed**: the handle was closed by this process
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("collection already exists: {0}")]
    AlreadyExists(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("tail cursor lost its position: {0}")]
    CursorLost(String),

    #[error("storage handle is closed")]
    Closed,
}

impl StorageError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StorageError::AlreadyExists(_))
    }
}

/// Opens database handles for a connection target.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Arc<dyn Database>, StorageError>;
}

/// One open connection to a storage target.
#[async_trait]
pub trait Database: Send + Sync {
    /// Create a collection; fails with [`StorageError::AlreadyExists`] when the
    /// name is taken, whatever the existing collection's options are.
    async fn create_collection(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> Result<Arc<dyn Collection>, StorageError>;

    /// Get a handle to an existing collection.
    async fn collection(&self, name: &str) -> Result<Arc<dyn Collection>, StorageError>;

    /// Release the connection. Later operations fail with `Closed`.
    async fn close(&self) -> Result<(), StorageError>;
}

/// An append-only, insertion-ordered collection.
#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    /// Append a message; resolves once the storage acknowledged the write.
    async fn insert(&self, message: &Message) -> Result<(), StorageError>;

    /// Open a tailable, wait-for-data cursor positioned at the live end.
    async fn tail(&self) -> Result<Box<dyn TailCursor>, StorageError>;
}

/// Live cursor over a capped collection.
#[async_trait]
pub trait TailCursor: Send {
    /// Wait for the next message.
    ///
    /// Suspends the caller until data arrives. `Ok(None)` means the cursor
    /// died and will never yield again. Dropping the returned future before it
    /// completes must not lose a message.
    async fn next(&mut self) -> Result<Option<Message>, StorageError>;

    async fn close(&mut self) -> Result<(), StorageError>;
}
