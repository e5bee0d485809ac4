//! Publish/subscribe abstraction over a topic (mechanics only).
//!
//! An `EventBus` publishes named events into a shared, ordered log and lets
//! local consumers observe what comes back out of it.
//!
//! ## Delivery
//!
//! - **Durable append**: `publish` resolves once the storage acknowledged the
//!   append, not once anyone read it.
//! - **Total order per topic**: every subscriber observes messages in append
//!   order, from the moment it attached onward.
//! - **No replay**: subscribers start at the live end of the log; anything
//!   evicted from a bounded log is gone.
//! - **Echo**: a bus that both publishes and subscribes sees its own messages.
//!
//! ## Thread Safety
//!
//! The trait requires `Send + Sync`; publishing from many tasks concurrently is
//! allowed.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use tailcast_core::PublishAck;

use crate::stream::Subscription;

#[async_trait]
pub trait EventBus: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    /// Append `(event, data)` to the topic.
    async fn publish(&self, event: &str, data: JsonValue) -> Result<PublishAck, Self::Error>;

    /// Subscribe to the live tail, or `None` when this bus never reads.
    fn subscribe(&self) -> Option<Subscription>;
}

#[async_trait]
impl<B> EventBus for Arc<B>
where
    B: EventBus + ?Sized,
{
    type Error = B::Error;

    async fn publish(&self, event: &str, data: JsonValue) -> Result<PublishAck, Self::Error> {
        (**self).publish(event, data).await
    }

    fn subscribe(&self) -> Option<Subscription> {
        (**self).subscribe()
    }
}
