//! Local event surface of a channel.
//!
//! Messages read from a topic's tail are re-emitted here: to named listeners
//! through [`EventEmitter`], and as raw [`Message`](tailcast_core::Message)s
//! through an [`EventStream`] for consumers that want the tail directly.

pub mod bus;
pub mod emitter;
pub mod stream;

pub use bus::EventBus;
pub use emitter::{ErrorListener, EventEmitter, Listener, ListenerId};
pub use stream::{EventStream, StreamError, Subscription};
