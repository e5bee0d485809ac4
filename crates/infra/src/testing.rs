//! Test doubles for the storage boundary.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::storage::{Collection, CollectionOptions, Connector, Database, StorageError};

/// Calls observed by a [`CountingConnector`] across every handle it opened.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub connects: usize,
    pub create_attempts: usize,
    pub created: usize,
    pub already_exists: usize,
    pub fetches: usize,
    pub closes: usize,
}

/// Wraps a connector and counts the storage calls made through it.
#[derive(Clone)]
pub struct CountingConnector<C> {
    inner: C,
    counts: Arc<Mutex<Counts>>,
    close_error: Option<StorageError>,
}

impl<C: Connector> CountingConnector<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            counts: Arc::new(Mutex::new(Counts::default())),
            close_error: None,
        }
    }

    /// Make every `close` report `err` (after really closing).
    pub fn failing_close(mut self, err: StorageError) -> Self {
        self.close_error = Some(err);
        self
    }

    pub fn counts(&self) -> Counts {
        *self.counts.lock().unwrap()
    }
}

#[async_trait]
impl<C: Connector> Connector for CountingConnector<C> {
    async fn connect(&self, url: &str) -> Result<Arc<dyn Database>, StorageError> {
        let inner = self.inner.connect(url).await?;
        self.counts.lock().unwrap().connects += 1;
        Ok(Arc::new(CountingDatabase {
            inner,
            counts: self.counts.clone(),
            close_error: self.close_error.clone(),
        }))
    }
}

struct CountingDatabase {
    inner: Arc<dyn Database>,
    counts: Arc<Mutex<Counts>>,
    close_error: Option<StorageError>,
}

#[async_trait]
impl Database for CountingDatabase {
    async fn create_collection(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> Result<Arc<dyn Collection>, StorageError> {
        let result = self.inner.create_collection(name, options).await;
        let mut counts = self.counts.lock().unwrap();
        counts.create_attempts += 1;
        match &result {
            Ok(_) => counts.created += 1,
            Err(e) if e.is_already_exists() => counts.already_exists += 1,
            Err(_) => {}
        }
        result
    }

    async fn collection(&self, name: &str) -> Result<Arc<dyn Collection>, StorageError> {
        self.counts.lock().unwrap().fetches += 1;
        self.inner.collection(name).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.counts.lock().unwrap().closes += 1;
        self.inner.close().await?;
        match &self.close_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// A database whose every operation fails with the same error.
pub struct FailingDatabase {
    error: StorageError,
}

impl FailingDatabase {
    pub fn new(error: StorageError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl Database for FailingDatabase {
    async fn create_collection(
        &self,
        _name: &str,
        _options: CollectionOptions,
    ) -> Result<Arc<dyn Collection>, StorageError> {
        Err(self.error.clone())
    }

    async fn collection(&self, _name: &str) -> Result<Arc<dyn Collection>, StorageError> {
        Err(self.error.clone())
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// A connector whose databases always fail with the same error.
pub struct FailingConnector {
    error: StorageError,
}

impl FailingConnector {
    pub fn new(error: StorageError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl Connector for FailingConnector {
    async fn connect(&self, _url: &str) -> Result<Arc<dyn Database>, StorageError> {
        Ok(Arc::new(FailingDatabase::new(self.error.clone())))
    }
}
