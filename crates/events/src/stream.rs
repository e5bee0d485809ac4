//! Direct access to a channel's live tail.
//!
//! Every message the tail delivers is broadcast here in arrival order, in
//! addition to being dispatched to named listeners.

use std::sync::{Arc, RwLock};

use thiserror::Error;
use tokio::sync::broadcast;

use tailcast_core::Message;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The tail has stopped and every buffered message was received.
    #[error("event stream closed")]
    Closed,

    /// The consumer fell behind and `n` messages were dropped for it.
    #[error("event stream lagged by {0} messages")]
    Lagged(u64),
}

/// A subscription to a channel's event stream.
///
/// Each subscription receives every message broadcast after it was created
/// (broadcast semantics). A slow subscription never blocks the tail: once it
/// falls more than the stream capacity behind, it observes
/// [`StreamError::Lagged`] and resumes with the oldest retained message.
///
/// ## Usage Pattern
///
/// ```ignore
/// let mut sub = channel.event_stream().expect("not write-only").subscribe();
///
/// loop {
///     match sub.recv().await {
///         Ok(message) => process(message)?,
///         Err(StreamError::Lagged(n)) => warn!(skipped = n, "consumer too slow"),
///         Err(StreamError::Closed) => break,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<Message>,
}

impl Subscription {
    pub fn new(receiver: broadcast::Receiver<Message>) -> Self {
        Self { receiver }
    }

    /// Wait until the next message is available.
    pub async fn recv(&mut self) -> Result<Message, StreamError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => StreamError::Closed,
            broadcast::error::RecvError::Lagged(n) => StreamError::Lagged(n),
        })
    }

    /// Take a message if one is buffered, without waiting.
    pub fn try_recv(&mut self) -> Result<Option<Message>, StreamError> {
        match self.receiver.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(StreamError::Closed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Err(StreamError::Lagged(n)),
        }
    }
}

/// Broadcast handle over the live tail of one channel.
///
/// Cheap to clone; all clones share one buffer. Closing the stream ends every
/// subscription once it has drained what was already buffered.
#[derive(Debug, Clone)]
pub struct EventStream {
    sender: Arc<RwLock<Option<broadcast::Sender<Message>>>>,
}

impl EventStream {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(RwLock::new(Some(sender))),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let guard = self.sender.read().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(sender) => Subscription::new(sender.subscribe()),
            None => {
                // Already closed: hand out a subscription that reports Closed.
                let (sender, receiver) = broadcast::channel(1);
                drop(sender);
                Subscription::new(receiver)
            }
        }
    }

    /// Broadcast a message. Returns how many subscriptions will see it.
    pub fn send(&self, message: Message) -> usize {
        let guard = self.sender.read().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(sender) => sender.send(message).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        let guard = self.sender.read().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map(|s| s.receiver_count()).unwrap_or(0)
    }

    pub fn close(&self) {
        let mut guard = self.sender.write().unwrap_or_else(|e| e.into_inner());
        guard.take();
    }

    pub fn is_closed(&self) -> bool {
        let guard = self.sender.read().unwrap_or_else(|e| e.into_inner());
        guard.is_none()
    }
}
