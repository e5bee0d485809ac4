//! Topic-scoped publish/subscribe channel over a capped collection.
//!
//! A [`Channel`] composes the pieces of one topic connection:
//!
//! - a [`Publisher`] appending `(event, data)` messages,
//! - unless write-only, a [`Subscriber`] tailing the collection and re-emitting
//!   every message to local listeners and to an [`EventStream`],
//! - a [`ShutdownCoordinator`] releasing the tail and connection exactly once.
//!
//! Messages a channel emits come back to its own listeners through the tail,
//! in the same order every other channel on the topic observes them.
//!
//! ## Usage Pattern
//!
//! ```ignore
//! let options = ChannelOptions::new()
//!     .with_url("mongodb://localhost:27017/app")
//!     .with_topic("orders");
//! let channel = Channel::open(options, &connector).await?;
//!
//! let closer = channel.downgrade();
//! channel.on("EOT", move |_| {
//!     if let Some(channel) = closer.upgrade() {
//!         channel.close_then(|result| tracing::info!(?result, "channel closed"));
//!     }
//! })?;
//! channel.emit("order.created", &order).await?;
//! channel.emit("EOT", ()).await?;
//! ```
//!
//! Listeners run on the channel's tail task. A listener holding a strong
//! `Channel` keeps the tail and connection alive until `close` is called;
//! capture a [`WeakChannel`] instead so dropping the last handle stops it.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use tracing::{Span, debug, instrument, trace};

use tailcast_core::{ChannelOptions, Message, PublishAck};
use tailcast_events::{EventBus, EventEmitter, EventStream, ListenerId, Subscription};

use crate::error::ChannelError;
use crate::provisioner::CollectionProvisioner;
use crate::publisher::Publisher;
use crate::shutdown::ShutdownCoordinator;
use crate::storage::{Connector, Database};
use crate::subscriber::{MessageSink, Subscriber};

/// Lifecycle of a channel. Transitions only move forward; `Closed` is terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelState {
    Created,
    Validating,
    Provisioning,
    Active,
    Closing,
    Closed,
}

/// Handle to an open channel. Clones share the same connection.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

/// Non-owning handle to a channel, for listeners that refer back to it.
#[derive(Clone)]
pub struct WeakChannel {
    inner: Weak<ChannelInner>,
}

impl WeakChannel {
    pub fn upgrade(&self) -> Option<Channel> {
        self.inner.upgrade().map(|inner| Channel { inner })
    }
}

impl core::fmt::Debug for WeakChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WeakChannel")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

struct ChannelInner {
    topic: String,
    write_only: bool,
    state: Mutex<ChannelState>,
    publisher: Publisher,
    emitter: Arc<EventEmitter<ChannelError>>,
    stream: Option<EventStream>,
    shutdown: ShutdownCoordinator,
}

impl Channel {
    /// Validate `options`, connect, provision the topic's collection and,
    /// unless write-only, start tailing it.
    ///
    /// Resolves once the channel is fully usable: anything published after
    /// this returns reaches the channel's listeners.
    #[instrument(skip_all, fields(topic = tracing::field::Empty), err)]
    pub async fn open(options: ChannelOptions, connector: &dyn Connector) -> Result<Self, ChannelError> {
        log_transition(ChannelState::Created, ChannelState::Validating);
        let options = options.validate()?;
        Span::current().record("topic", options.topic.as_str());

        log_transition(ChannelState::Validating, ChannelState::Provisioning);
        let database = connector
            .connect(&options.url)
            .await
            .map_err(ChannelError::Provisioning)?;

        let collection = match CollectionProvisioner
            .ensure(database.as_ref(), &options.topic, options.collection_size)
            .await
        {
            Ok(collection) => collection,
            Err(err) => {
                abandon(database.as_ref()).await;
                return Err(err);
            }
        };

        let publisher = Publisher::new(collection.clone());
        let emitter = Arc::new(EventEmitter::new());

        let (stream, subscriber) = if options.write_only {
            (None, None)
        } else {
            let stream = EventStream::new(options.stream_capacity);
            let sink = ChannelSink {
                emitter: emitter.clone(),
                stream: stream.clone(),
            };
            match Subscriber::start(collection, sink, options.tail).await {
                Ok(handle) => (Some(stream), Some(handle)),
                Err(err) => {
                    abandon(database.as_ref()).await;
                    return Err(ChannelError::Provisioning(err));
                }
            }
        };

        log_transition(ChannelState::Provisioning, ChannelState::Active);
        Ok(Self {
            inner: Arc::new(ChannelInner {
                topic: options.topic,
                write_only: options.write_only,
                state: Mutex::new(ChannelState::Active),
                publisher,
                emitter,
                stream,
                shutdown: ShutdownCoordinator::new(database, subscriber),
            }),
        })
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// A handle that does not keep the channel open.
    pub fn downgrade(&self) -> WeakChannel {
        WeakChannel {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn is_write_only(&self) -> bool {
        self.inner.write_only
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live tail as raw messages; `None` for write-only channels.
    pub fn event_stream(&self) -> Option<&EventStream> {
        self.inner.stream.as_ref()
    }

    /// Listen for `event`. Listeners run on the tail task, in registration
    /// order, and must not block.
    pub fn on<F>(&self, event: impl Into<String>, listener: F) -> Result<ListenerId, ChannelError>
    where
        F: Fn(&JsonValue) + Send + Sync + 'static,
    {
        self.ensure_active()?;
        Ok(self.inner.emitter.on(event, listener))
    }

    pub fn once<F>(&self, event: impl Into<String>, listener: F) -> Result<ListenerId, ChannelError>
    where
        F: Fn(&JsonValue) + Send + Sync + 'static,
    {
        self.ensure_active()?;
        Ok(self.inner.emitter.once(event, listener))
    }

    /// Listen for runtime errors (tail failures).
    pub fn on_error<F>(&self, listener: F) -> Result<ListenerId, ChannelError>
    where
        F: Fn(&ChannelError) + Send + Sync + 'static,
    {
        self.ensure_active()?;
        Ok(self.inner.emitter.on_error(listener))
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.emitter.off(id)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.emitter.listener_count(event)
    }

    /// Publish `data` under `event` to every channel on the topic, this one
    /// included. Local listeners are not invoked directly.
    pub async fn emit<T>(&self, event: &str, data: T) -> Result<PublishAck, ChannelError>
    where
        T: Serialize,
    {
        self.ensure_active()?;
        let data = serde_json::to_value(data).map_err(|e| ChannelError::Payload(e.to_string()))?;
        self.inner
            .publisher
            .publish(event, data)
            .await
            .map_err(ChannelError::Publish)
    }

    /// Stop tailing, release the connection and drop every listener.
    ///
    /// Safe to call repeatedly and concurrently; every call completes once
    /// release has finished. Only the call that performed the release reports
    /// a release failure, and the channel is closed regardless.
    #[instrument(skip(self), fields(topic = %self.inner.topic))]
    pub async fn close(&self) -> Result<(), ChannelError> {
        self.inner.advance(ChannelState::Closing);
        let result = self.inner.shutdown.close().await;

        self.inner.emitter.clear();
        if let Some(stream) = &self.inner.stream {
            stream.close();
        }
        self.inner.advance(ChannelState::Closed);
        result
    }

    /// Close on a separate task and hand the result to `callback`.
    ///
    /// Usable from inside a listener, where awaiting `close` is not possible.
    pub fn close_then<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<(), ChannelError>) + Send + 'static,
    {
        let channel = self.clone();
        tokio::spawn(async move {
            let result = channel.close().await;
            callback(result);
        })
    }

    fn ensure_active(&self) -> Result<(), ChannelError> {
        match self.state() {
            ChannelState::Active => Ok(()),
            _ => Err(ChannelError::Closed),
        }
    }
}

impl ChannelInner {
    fn advance(&self, next: ChannelState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if next > *state {
            log_transition(*state, next);
            *state = next;
        }
    }
}

impl core::fmt::Debug for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Channel")
            .field("topic", &self.inner.topic)
            .field("write_only", &self.inner.write_only)
            .field("state", &self.state())
            .finish()
    }
}

#[async_trait]
impl EventBus for Channel {
    type Error = ChannelError;

    async fn publish(&self, event: &str, data: JsonValue) -> Result<PublishAck, Self::Error> {
        self.emit(event, data).await
    }

    fn subscribe(&self) -> Option<Subscription> {
        self.event_stream().map(EventStream::subscribe)
    }
}

/// Routes tailed messages into a channel's local surface.
struct ChannelSink {
    emitter: Arc<EventEmitter<ChannelError>>,
    stream: EventStream,
}

impl MessageSink for ChannelSink {
    fn deliver(&self, message: Message) {
        let listeners = self.emitter.dispatch(message.event(), message.data());
        trace!(event = message.event(), listeners, "message delivered");
        self.stream.send(message);
    }

    fn fail(&self, error: ChannelError) {
        if self.emitter.dispatch_error(&error) == 0 {
            debug!(error = %error, "no error listener registered");
        }
    }
}

fn log_transition(from: ChannelState, to: ChannelState) {
    debug!(from = ?from, to = ?to, "channel state changed");
}

/// Close a connection that an `open` failed halfway through.
async fn abandon(database: &dyn Database) {
    if let Err(err) = database.close().await {
        debug!(error = %err, "connection of failed open did not close cleanly");
    }
}
