use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use tailcast_core::Message;

use super::r#trait::{Collection, CollectionOptions, Connector, Database, StorageError, TailCursor};

const URL_SCHEME: &str = "memory://";

/// In-process capped-collection storage.
///
/// Intended for tests, benchmarks and single-process use. Every `memory://`
/// url names an independent database; all handles connected to the same url
/// share its collections, so several channels in one process behave like
/// several processes sharing one server.
///
/// Message size is measured as the length of its JSON encoding.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStorage {
    targets: Arc<Mutex<HashMap<String, Arc<DatabaseState>>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum size a collection was created with.
    pub fn capped_size(&self, url: &str, name: &str) -> Option<u64> {
        self.log(url, name).map(|log| log.max_bytes)
    }

    /// Number of messages currently retained by a collection.
    pub fn retained(&self, url: &str, name: &str) -> Option<usize> {
        self.log(url, name).map(|log| lock(&log.inner).entries.len())
    }

    /// Kill every open cursor on a collection, as a server does when it
    /// reclaims cursors. New tails are unaffected.
    pub fn kill_cursors(&self, url: &str, name: &str) -> bool {
        match self.log(url, name) {
            Some(log) => {
                lock(&log.inner).generation += 1;
                log.notify.notify_waiters();
                true
            }
            None => false,
        }
    }

    fn log(&self, url: &str, name: &str) -> Option<Arc<CappedLog>> {
        let state = lock(&self.targets).get(url).cloned()?;
        let collections = lock(&state.collections);
        collections.get(name).cloned()
    }
}

#[async_trait]
impl Connector for InMemoryStorage {
    async fn connect(&self, url: &str) -> Result<Arc<dyn Database>, StorageError> {
        let Some(rest) = url.strip_prefix(URL_SCHEME) else {
            return Err(StorageError::Connection(format!(
                "unsupported url '{url}', expected {URL_SCHEME}<name>"
            )));
        };
        if rest.is_empty() {
            return Err(StorageError::Connection(format!("url '{url}' has no database name")));
        }

        let state = lock(&self.targets)
            .entry(url.to_string())
            .or_default()
            .clone();

        Ok(Arc::new(InMemoryDatabase {
            state,
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

#[derive(Debug, Default)]
struct DatabaseState {
    collections: Mutex<HashMap<String, Arc<CappedLog>>>,
}

/// A connection handle; closing it invalidates everything obtained through it.
#[derive(Debug)]
struct InMemoryDatabase {
    state: Arc<DatabaseState>,
    closed: Arc<AtomicBool>,
}

impl InMemoryDatabase {
    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn handle(&self, log: Arc<CappedLog>) -> Arc<dyn Collection> {
        Arc::new(InMemoryCollection {
            log,
            closed: self.closed.clone(),
        })
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn create_collection(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> Result<Arc<dyn Collection>, StorageError> {
        self.ensure_open()?;
        if !options.capped {
            return Err(StorageError::Command(
                "in-memory storage only supports capped collections".to_string(),
            ));
        }
        if options.size == 0 {
            return Err(StorageError::Command("capped size must be positive".to_string()));
        }

        let log = {
            let mut collections = lock(&self.state.collections);
            if collections.contains_key(name) {
                return Err(StorageError::AlreadyExists(name.to_string()));
            }
            let log = Arc::new(CappedLog::new(name, options.size));
            collections.insert(name.to_string(), log.clone());
            log
        };

        Ok(self.handle(log))
    }

    async fn collection(&self, name: &str) -> Result<Arc<dyn Collection>, StorageError> {
        self.ensure_open()?;
        let log = lock(&self.state.collections)
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::Command(format!("collection '{name}' does not exist")))?;
        Ok(self.handle(log))
    }

    async fn close(&self) -> Result<(), StorageError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Wake cursors opened through this handle so they observe the close.
        for log in lock(&self.state.collections).values() {
            log.notify.notify_waiters();
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Stored {
    seq: u64,
    size: u64,
    message: Message,
}

#[derive(Debug, Default)]
struct LogInner {
    entries: VecDeque<Stored>,
    used: u64,
    next_seq: u64,
    generation: u64,
}

/// Bounded, insertion-ordered log; evicts from the front once full.
#[derive(Debug)]
struct CappedLog {
    name: String,
    max_bytes: u64,
    inner: Mutex<LogInner>,
    notify: Notify,
}

impl CappedLog {
    fn new(name: &str, max_bytes: u64) -> Self {
        Self {
            name: name.to_string(),
            max_bytes,
            inner: Mutex::new(LogInner::default()),
            notify: Notify::new(),
        }
    }

    fn append(&self, message: &Message) -> Result<(), StorageError> {
        let size = serde_json::to_vec(message)
            .map_err(|e| StorageError::Serialization(e.to_string()))?
            .len() as u64;
        if size > self.max_bytes {
            return Err(StorageError::Command(format!(
                "message of {size} bytes exceeds capped size {} of '{}'",
                self.max_bytes, self.name
            )));
        }

        {
            let mut inner = lock(&self.inner);
            while inner.used + size > self.max_bytes {
                match inner.entries.pop_front() {
                    Some(evicted) => inner.used -= evicted.size,
                    None => break,
                }
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.used += size;
            inner.entries.push_back(Stored {
                seq,
                size,
                message: message.clone(),
            });
        }

        self.notify.notify_waiters();
        Ok(())
    }

    /// Position just past the newest entry, plus the current cursor generation.
    fn live_end(&self) -> (u64, u64) {
        let inner = lock(&self.inner);
        (inner.next_seq, inner.generation)
    }

    fn read(&self, position: u64, generation: u64) -> Result<Read, StorageError> {
        let inner = lock(&self.inner);
        if inner.generation != generation {
            return Ok(Read::Killed);
        }
        if position >= inner.next_seq {
            return Ok(Read::Pending);
        }

        let Some(oldest) = inner.entries.front().map(|e| e.seq) else {
            return Err(StorageError::CursorLost(self.name.clone()));
        };
        if position < oldest {
            return Err(StorageError::CursorLost(self.name.clone()));
        }

        let stored = &inner.entries[(position - oldest) as usize];
        Ok(Read::Ready(stored.message.clone()))
    }
}

enum Read {
    Ready(Message),
    Pending,
    Killed,
}

#[derive(Debug)]
struct InMemoryCollection {
    log: Arc<CappedLog>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Collection for InMemoryCollection {
    fn name(&self) -> &str {
        &self.log.name
    }

    async fn insert(&self, message: &Message) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        self.log.append(message)
    }

    async fn tail(&self) -> Result<Box<dyn TailCursor>, StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        let (position, generation) = self.log.live_end();
        Ok(Box::new(InMemoryTailCursor {
            log: self.log.clone(),
            connection_closed: self.closed.clone(),
            position,
            generation,
            closed: false,
        }))
    }
}

#[derive(Debug)]
struct InMemoryTailCursor {
    log: Arc<CappedLog>,
    connection_closed: Arc<AtomicBool>,
    position: u64,
    generation: u64,
    closed: bool,
}

#[async_trait]
impl TailCursor for InMemoryTailCursor {
    async fn next(&mut self) -> Result<Option<Message>, StorageError> {
        loop {
            // Register interest before checking, so an append that lands
            // between the check and the await still wakes us.
            let notified = self.log.notify.notified();

            if self.closed {
                return Ok(None);
            }
            if self.connection_closed.load(Ordering::Acquire) {
                return Err(StorageError::Closed);
            }

            match self.log.read(self.position, self.generation)? {
                Read::Ready(message) => {
                    self.position += 1;
                    return Ok(Some(message));
                }
                Read::Killed => {
                    self.closed = true;
                    return Ok(None);
                }
                Read::Pending => notified.await,
            }
        }
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        self.closed = true;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    const URL: &str = "memory://tests";

    // Fixed id and timestamp so every message encodes to the same size.
    fn fixed(n: u8) -> Message {
        let at = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        Message::from_parts(uuid::Uuid::nil(), "e", json!(n), at)
    }

    fn fixed_size() -> u64 {
        serde_json::to_vec(&fixed(0)).unwrap().len() as u64
    }

    async fn create(storage: &InMemoryStorage, name: &str, size: u64) -> Arc<dyn Collection> {
        let db = storage.connect(URL).await.unwrap();
        db.create_collection(name, CollectionOptions::capped(size)).await.unwrap()
    }

    #[tokio::test]
    async fn rejects_foreign_urls() {
        let storage = InMemoryStorage::new();
        for url in ["mongodb://localhost/db", "memory://"] {
            let err = storage.connect(url).await.err().unwrap();
            assert!(matches!(err, StorageError::Connection(_)), "url {url}");
        }
    }

    #[tokio::test]
    async fn second_create_reports_already_exists() {
        let storage = InMemoryStorage::new();
        create(&storage, "t", 4096).await;

        let db = storage.connect(URL).await.unwrap();
        let err = db
            .create_collection("t", CollectionOptions::capped(1))
            .await
            .err()
            .unwrap();

        assert!(err.is_already_exists());
        assert_eq!(storage.capped_size(URL, "t"), Some(4096));
    }

    #[tokio::test]
    async fn oldest_entries_are_evicted_when_full() {
        let storage = InMemoryStorage::new();
        let coll = create(&storage, "small", fixed_size() * 3).await;

        for n in 0..5 {
            coll.insert(&fixed(n)).await.unwrap();
        }

        assert_eq!(storage.retained(URL, "small"), Some(3));
    }

    #[tokio::test]
    async fn oversized_message_is_rejected() {
        let storage = InMemoryStorage::new();
        let coll = create(&storage, "tiny", 16).await;

        let err = coll
            .insert(&Message::new("big", json!("x".repeat(64))))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Command(_)));
    }

    #[tokio::test]
    async fn tail_starts_at_live_end_and_wakes_on_append() {
        let storage = InMemoryStorage::new();
        let coll = create(&storage, "live", 1 << 20).await;
        coll.insert(&Message::new("before", json!(null))).await.unwrap();

        let mut cursor = coll.tail().await.unwrap();
        let writer = coll.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.insert(&Message::new("after", json!(1))).await.unwrap();
        });

        let got = tokio::time::timeout(Duration::from_secs(5), cursor.next())
            .await
            .expect("tail should wake on append")
            .unwrap()
            .unwrap();
        assert_eq!(got.event(), "after");
    }

    #[tokio::test]
    async fn killed_cursor_reports_exhaustion() {
        let storage = InMemoryStorage::new();
        let coll = create(&storage, "k", 1 << 20).await;
        let mut cursor = coll.tail().await.unwrap();

        assert!(storage.kill_cursors(URL, "k"));
        assert!(cursor.next().await.unwrap().is_none());

        let mut fresh = coll.tail().await.unwrap();
        coll.insert(&Message::new("again", json!(null))).await.unwrap();
        assert_eq!(fresh.next().await.unwrap().unwrap().event(), "again");
    }

    #[tokio::test]
    async fn closing_the_connection_wakes_waiting_cursors() {
        let storage = InMemoryStorage::new();
        let db = storage.connect(URL).await.unwrap();
        let coll = db
            .create_collection("c", CollectionOptions::capped(1 << 20))
            .await
            .unwrap();
        let mut cursor = coll.tail().await.unwrap();

        let closer = db.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close().await.unwrap();
        });

        let res = tokio::time::timeout(Duration::from_secs(5), cursor.next())
            .await
            .expect("close should wake the cursor");
        assert_eq!(res.unwrap_err(), StorageError::Closed);
        assert_eq!(
            coll.insert(&Message::new("late", json!(null))).await.unwrap_err(),
            StorageError::Closed
        );
    }

    #[tokio::test]
    async fn cursor_that_falls_behind_is_lost() {
        let storage = InMemoryStorage::new();
        let coll = create(&storage, "lossy", fixed_size() * 2).await;
        let mut cursor = coll.tail().await.unwrap();

        for n in 0..4 {
            coll.insert(&fixed(n)).await.unwrap();
        }

        assert!(matches!(cursor.next().await, Err(StorageError::CursorLost(_))));
    }
}
