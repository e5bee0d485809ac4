//! MongoDB-backed storage (optional, `mongodb` feature).
//!
//! Topics map to capped collections in the url's default database. Tails use
//! `TailableAwait` cursors, so the server holds each `getMore` open until new
//! documents arrive instead of the client polling.
//!
//! ## Error Mapping
//!
//! | Mongo error | Code | StorageError |
//! |---|---|---|
//! | NamespaceExists on create | `48` | `AlreadyExists` |
//! | Client construction / missing database | N/A | `Connection` |
//! | Any other command error | any | `Command` |
//! | BSON encode / decode | N/A | `Serialization` |
//!
//! A tailable cursor on an empty capped collection is closed by the server
//! immediately, so creation inserts a seed document. Documents without an
//! `event` field (the seed) are never delivered.
//!
//! ## Live End
//!
//! `_id`s are generated by each client and do not follow append order across
//! processes, so a tail cannot be positioned with an `_id` range. It reads in
//! `$natural` (append) order from the start of the collection and skips
//! everything up to and including the document that was newest when it
//! attached. If that document is evicted before the tail reaches it, the
//! server kills the cursor and the tail is reported lost.

use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::{self, Bson, Document, doc};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::{CreateCollectionOptions, CursorType, FindOneOptions, FindOptions};
use mongodb::{Client, Cursor};
use tokio::sync::Mutex;
use tracing::debug;

use tailcast_core::Message;

use super::r#trait::{Collection, CollectionOptions, Connector, Database, StorageError, TailCursor};

const NAMESPACE_EXISTS: i32 = 48;

/// Connects to `mongodb://` / `mongodb+srv://` urls naming a default database.
#[derive(Debug, Default, Clone, Copy)]
pub struct MongoConnector;

#[async_trait]
impl Connector for MongoConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn Database>, StorageError> {
        let client = Client::with_uri_str(url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let db = client.default_database().ok_or_else(|| {
            StorageError::Connection(format!("url '{url}' does not name a database"))
        })?;

        Ok(Arc::new(MongoDatabase {
            client: Mutex::new(Some(client)),
            db,
        }))
    }
}

#[derive(Debug)]
struct MongoDatabase {
    client: Mutex<Option<Client>>,
    db: mongodb::Database,
}

impl MongoDatabase {
    async fn ensure_open(&self) -> Result<(), StorageError> {
        if self.client.lock().await.is_none() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn handle(&self, name: &str) -> Arc<dyn Collection> {
        Arc::new(MongoCollection {
            name: name.to_string(),
            inner: self.db.collection::<Document>(name),
        })
    }
}

#[async_trait]
impl Database for MongoDatabase {
    async fn create_collection(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> Result<Arc<dyn Collection>, StorageError> {
        self.ensure_open().await?;

        let create = CreateCollectionOptions::builder()
            .capped(options.capped)
            .size(options.size)
            .build();

        match self.db.create_collection(name, create).await {
            Ok(()) => {}
            Err(e) if is_namespace_exists(&e) => {
                return Err(StorageError::AlreadyExists(name.to_string()));
            }
            Err(e) => return Err(map_mongo_error("create_collection", e)),
        }

        self.db
            .collection::<Document>(name)
            .insert_one(doc! { "seed": true }, None)
            .await
            .map_err(|e| map_mongo_error("seed", e))?;

        debug!(collection = name, size = options.size, "created capped collection");
        Ok(self.handle(name))
    }

    async fn collection(&self, name: &str) -> Result<Arc<dyn Collection>, StorageError> {
        self.ensure_open().await?;
        Ok(self.handle(name))
    }

    async fn close(&self) -> Result<(), StorageError> {
        let client = self.client.lock().await.take();
        if let Some(client) = client {
            client.shutdown().await;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct MongoCollection {
    name: String,
    inner: mongodb::Collection<Document>,
}

#[async_trait]
impl Collection for MongoCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert(&self, message: &Message) -> Result<(), StorageError> {
        let document =
            bson::to_document(message).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.inner
            .insert_one(document, None)
            .await
            .map_err(|e| map_mongo_error("insert", e))?;
        Ok(())
    }

    async fn tail(&self) -> Result<Box<dyn TailCursor>, StorageError> {
        let newest = self
            .inner
            .find_one(None, FindOneOptions::builder().sort(doc! { "$natural": -1 }).build())
            .await
            .map_err(|e| map_mongo_error("find_newest", e))?;

        let live_end = LiveEnd::new(newest.and_then(|mut d| d.remove("_id")));

        let options = FindOptions::builder()
            .cursor_type(CursorType::TailableAwait)
            .no_cursor_timeout(true)
            .build();

        let cursor = self
            .inner
            .find(doc! {}, options)
            .await
            .map_err(|e| map_mongo_error("tail", e))?;

        Ok(Box::new(MongoTailCursor {
            cursor: Some(cursor),
            live_end,
        }))
    }
}

struct MongoTailCursor {
    cursor: Option<Cursor<Document>>,
    live_end: LiveEnd,
}

#[async_trait]
impl TailCursor for MongoTailCursor {
    async fn next(&mut self) -> Result<Option<Message>, StorageError> {
        loop {
            let Some(cursor) = self.cursor.as_mut() else {
                return Ok(None);
            };

            let alive = cursor
                .advance()
                .await
                .map_err(|e| map_mongo_error("tail_next", e))?;
            if !alive {
                self.cursor = None;
                return Ok(None);
            }

            let document = cursor
                .deserialize_current()
                .map_err(|e| map_mongo_error("tail_decode", e))?;
            if !self.live_end.admits(document.get("_id")) || !document.contains_key("event") {
                continue;
            }

            let message: Message = bson::from_document(document)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            return Ok(Some(message));
        }
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        // Dropping the cursor kills it on the server.
        self.cursor.take();
        Ok(())
    }
}

/// Tracks whether a tail has read past the document that was newest when it
/// attached.
#[derive(Debug)]
struct LiveEnd {
    pending: Option<Bson>,
}

impl LiveEnd {
    fn new(newest: Option<Bson>) -> Self {
        Self { pending: newest }
    }

    /// Whether the document with `id` was appended after attach.
    fn admits(&mut self, id: Option<&Bson>) -> bool {
        let Some(newest) = &self.pending else {
            return true;
        };
        if id == Some(newest) {
            self.pending = None;
        }
        false
    }
}

fn is_namespace_exists(err: &MongoError) -> bool {
    matches!(err.kind.as_ref(), ErrorKind::Command(c) if c.code == NAMESPACE_EXISTS)
}

fn map_mongo_error(operation: &str, err: MongoError) -> StorageError {
    match err.kind.as_ref() {
        ErrorKind::BsonDeserialization(_) | ErrorKind::BsonSerialization(_) => {
            StorageError::Serialization(format!("{operation}: {err}"))
        }
        ErrorKind::ConnectionPoolCleared { .. } | ErrorKind::ServerSelection { .. } => {
            StorageError::Connection(format!("{operation}: {err}"))
        }
        _ => StorageError::Command(format!("{operation}: {err}")),
    }
}
