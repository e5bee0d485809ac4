//! `tailcast-core`: building blocks shared by the channel crates.
//!
//! This crate contains **pure** types (no I/O): messages, capacity parsing and
//! channel configuration.

pub mod error;
pub mod message;
pub mod options;
pub mod size;

pub use error::{ConfigError, SizeError};
pub use message::{Message, PublishAck};
pub use options::{ChannelOptions, TailPolicy, ValidatedOptions};
pub use size::CollectionSize;
