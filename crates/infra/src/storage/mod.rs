//! Storage collaborator boundary.
//!
//! The channel only needs four things from storage: open a connection, create
//! a capped collection (telling "already exists" apart from other failures),
//! fetch an existing collection, and tail it with wait-for-data semantics.
//! This module defines that boundary and ships implementations of it.

pub mod in_memory;
#[cfg(feature = "mongodb")]
pub mod mongo;
pub mod r#trait;

pub use in_memory::InMemoryStorage;
#[cfg(feature = "mongodb")]
pub use mongo::MongoConnector;
pub use r#trait::{Collection, CollectionOptions, Connector, Database, StorageError, TailCursor};
