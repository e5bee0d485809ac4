//! Live tail over a topic's collection.
//!
//! One subscriber owns one cursor and one tokio task. The task suspends on
//! the cursor until storage has new data (no interval polling) and hands
//! every message to its [`MessageSink`], in arrival order, exactly once.
//!
//! ## Recovery
//!
//! When the cursor fails or dies, the failure is reported to the sink as a
//! [`ChannelError::Tail`] and the tail is reopened from the live end of the
//! collection, at most `TailPolicy::max_retries` consecutive times with
//! `TailPolicy::retry_delay` between attempts. Messages appended while no
//! cursor was open are not delivered. Once retries are exhausted the task
//! ends; nothing else is attempted.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tailcast_core::{Message, TailPolicy};

use crate::error::ChannelError;
use crate::storage::{Collection, StorageError, TailCursor};

/// Receiver of everything a tail reads.
///
/// Both methods run on the tail task; they must not block on the channel's
/// own shutdown.
pub trait MessageSink: Send + Sync + 'static {
    fn deliver(&self, message: Message);

    fn fail(&self, error: ChannelError);
}

/// Handle to control a running tail.
#[derive(Debug)]
pub struct SubscriberHandle {
    cancel: CancellationToken,
    join: Option<JoinHandle<Result<(), StorageError>>>,
}

impl SubscriberHandle {
    /// Whether the tail task is still running.
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Stop the tail and wait for it to release its cursor.
    ///
    /// Interrupts a suspended wait, so this completes without any new data
    /// arriving. Safe to call from any task other than the tail task itself.
    pub async fn stop(mut self) -> Result<(), StorageError> {
        self.cancel.cancel();
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        match join.await {
            Ok(result) => result,
            Err(e) => Err(StorageError::Command(format!("tail task failed: {e}"))),
        }
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Subscriber;

impl Subscriber {
    /// Open a tail at the live end of `collection` and start delivering.
    ///
    /// Resolves once the cursor is open, so nothing appended after this
    /// returns can be missed.
    pub async fn start<S>(
        collection: Arc<dyn Collection>,
        sink: S,
        policy: TailPolicy,
    ) -> Result<SubscriberHandle, StorageError>
    where
        S: MessageSink,
    {
        let cursor = collection.tail().await?;
        let cancel = CancellationToken::new();

        debug!(topic = collection.name(), "tail opened");
        let join = tokio::spawn(tail_loop(collection, cursor, sink, policy, cancel.clone()));

        Ok(SubscriberHandle {
            cancel,
            join: Some(join),
        })
    }
}

async fn tail_loop<S: MessageSink>(
    collection: Arc<dyn Collection>,
    mut cursor: Box<dyn TailCursor>,
    sink: S,
    policy: TailPolicy,
    cancel: CancellationToken,
) -> Result<(), StorageError> {
    let topic = collection.name().to_string();
    let mut failures: u32 = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = cursor.next() => next,
        };

        let err = match next {
            Ok(Some(message)) => {
                failures = 0;
                sink.deliver(message);
                continue;
            }
            Ok(None) => StorageError::CursorLost(format!("tail on '{topic}' was closed by storage")),
            Err(err) => err,
        };

        warn!(topic = %topic, error = %err, "tail failed");
        sink.fail(ChannelError::Tail(err));
        if let Err(e) = cursor.close().await {
            debug!(topic = %topic, error = %e, "failed cursor did not close cleanly");
        }

        cursor = loop {
            if failures >= policy.max_retries {
                warn!(topic = %topic, attempts = failures, "tail retries exhausted, stopping");
                return Ok(());
            }
            failures += 1;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(policy.retry_delay()) => {}
            }

            match collection.tail().await {
                Ok(reopened) => {
                    info!(topic = %topic, attempt = failures, "tail reopened");
                    break reopened;
                }
                Err(err) => {
                    warn!(topic = %topic, attempt = failures, error = %err, "tail reopen failed");
                    sink.fail(ChannelError::Tail(err));
                }
            }
        };
    }

    debug!(topic = %topic, "tail stopping");
    cursor.close().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::storage::{CollectionOptions, Connector, InMemoryStorage};

    const URL: &str = "memory://subscriber";

    type Seen = Result<Message, ChannelError>;

    struct ChannelSink(mpsc::UnboundedSender<Seen>);

    impl MessageSink for ChannelSink {
        fn deliver(&self, message: Message) {
            let _ = self.0.send(Ok(message));
        }

        fn fail(&self, error: ChannelError) {
            let _ = self.0.send(Err(error));
        }
    }

    async fn setup(topic: &str) -> (InMemoryStorage, Arc<dyn Collection>) {
        let storage = InMemoryStorage::new();
        let db = storage.connect(URL).await.unwrap();
        let coll = db
            .create_collection(topic, CollectionOptions::capped(1 << 20))
            .await
            .unwrap();
        (storage, coll)
    }

    async fn next_seen(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("sink should receive within 5s")
            .expect("sink sender dropped")
    }

    fn fast_retry(max_retries: u32) -> TailPolicy {
        TailPolicy {
            max_retries,
            retry_delay_ms: 10,
        }
    }

    #[tokio::test]
    async fn delivers_in_append_order() {
        let (_storage, coll) = setup("ordered").await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = Subscriber::start(coll.clone(), ChannelSink(tx), TailPolicy::default())
            .await
            .unwrap();

        for n in 0..10 {
            coll.insert(&Message::new("n", json!(n))).await.unwrap();
        }
        for n in 0..10 {
            assert_eq!(next_seen(&mut rx).await.unwrap().data(), &json!(n));
        }

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn messages_before_start_are_not_replayed() {
        let (_storage, coll) = setup("live-end").await;
        coll.insert(&Message::new("old", json!(null))).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = Subscriber::start(coll.clone(), ChannelSink(tx), TailPolicy::default())
            .await
            .unwrap();
        coll.insert(&Message::new("new", json!(null))).await.unwrap();

        assert_eq!(next_seen(&mut rx).await.unwrap().event(), "new");
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_interrupts_an_idle_wait() {
        let (_storage, coll) = setup("idle").await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = Subscriber::start(coll, ChannelSink(tx), TailPolicy::default())
            .await
            .unwrap();
        assert!(handle.is_running());

        let stopped = tokio::spawn(async move { handle.stop().await });
        tokio::time::timeout(Duration::from_secs(1), stopped)
            .await
            .expect("stop should not wait for data")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn killed_cursor_is_reported_and_reopened() {
        let (storage, coll) = setup("flaky").await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = Subscriber::start(coll.clone(), ChannelSink(tx), fast_retry(3))
            .await
            .unwrap();

        storage.kill_cursors(URL, "flaky");
        match next_seen(&mut rx).await {
            Err(ChannelError::Tail(StorageError::CursorLost(_))) => {}
            other => panic!("expected a tail error, got {other:?}"),
        }

        // The reopened tail only sees messages appended after it attached.
        let mut delivered = None;
        for _ in 0..200 {
            coll.insert(&Message::new("after", json!(null))).await.unwrap();
            if let Ok(Some(seen)) = tokio::time::timeout(Duration::from_millis(20), rx.recv()).await {
                delivered = Some(seen);
                break;
            }
        }
        assert_eq!(delivered.unwrap().unwrap().event(), "after");
        assert!(handle.is_running());

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn without_retries_the_tail_ends_after_a_failure() {
        let (storage, coll) = setup("fragile").await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = Subscriber::start(coll, ChannelSink(tx), TailPolicy::no_retry())
            .await
            .unwrap();

        storage.kill_cursors(URL, "fragile");
        assert!(matches!(next_seen(&mut rx).await, Err(ChannelError::Tail(_))));

        for _ in 0..100 {
            if !handle.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!handle.is_running());
        handle.stop().await.unwrap();
    }
}
