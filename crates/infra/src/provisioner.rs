//! Create-or-reuse of a topic's capped collection.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use tailcast_core::CollectionSize;

use crate::error::ChannelError;
use crate::storage::{Collection, CollectionOptions, Database, StorageError};

/// Ensures a topic's capped collection exists.
///
/// Several processes may race to create the same topic on first use. Whoever
/// loses gets `AlreadyExists` and falls back to the existing collection, at
/// whatever size it was created with; a collection is never resized.
#[derive(Debug, Default, Clone, Copy)]
pub struct CollectionProvisioner;

impl CollectionProvisioner {
    #[instrument(skip(self, db, size), fields(bytes = size.bytes()), err)]
    pub async fn ensure(
        &self,
        db: &dyn Database,
        topic: &str,
        size: CollectionSize,
    ) -> Result<Arc<dyn Collection>, ChannelError> {
        match db
            .create_collection(topic, CollectionOptions::capped(size.bytes()))
            .await
        {
            Ok(collection) => {
                debug!(topic, "created capped collection");
                Ok(collection)
            }
            Err(StorageError::AlreadyExists(_)) => {
                debug!(topic, "capped collection exists, reusing it");
                db.collection(topic).await.map_err(ChannelError::Provisioning)
            }
            Err(err) => {
                warn!(topic, error = %err, "capped collection could not be created");
                Err(ChannelError::Provisioning(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Connector, InMemoryStorage};
    use crate::testing::{CountingConnector, FailingDatabase};

    const URL: &str = "memory://provisioner";

    #[tokio::test]
    async fn creates_missing_collection_with_requested_size() {
        let storage = InMemoryStorage::new();
        let connector = CountingConnector::new(storage.clone());
        let db = connector.connect(URL).await.unwrap();

        let size = CollectionSize::parse("7mb").unwrap();
        let coll = CollectionProvisioner.ensure(db.as_ref(), "fresh", size).await.unwrap();

        assert_eq!(coll.name(), "fresh");
        assert_eq!(storage.capped_size(URL, "fresh"), Some(7 * 1_048_576));
        let counts = connector.counts();
        assert_eq!(counts.created, 1);
        assert_eq!(counts.fetches, 0);
    }

    #[tokio::test]
    async fn existing_collection_is_fetched_not_resized() {
        let storage = InMemoryStorage::new();
        let seed = storage.connect(URL).await.unwrap();
        seed.create_collection("taken", CollectionOptions::capped(4096))
            .await
            .unwrap();

        let connector = CountingConnector::new(storage.clone());
        let db = connector.connect(URL).await.unwrap();
        let coll = CollectionProvisioner
            .ensure(db.as_ref(), "taken", CollectionSize::DEFAULT)
            .await
            .unwrap();

        assert_eq!(coll.name(), "taken");
        assert_eq!(storage.capped_size(URL, "taken"), Some(4096));
        let counts = connector.counts();
        assert_eq!(counts.fetches, 1);
        assert_eq!(counts.created, 0);
    }

    #[tokio::test]
    async fn other_creation_failures_propagate_unchanged() {
        let cause = StorageError::Command("not authorized on tailcast".to_string());
        let db = FailingDatabase::new(cause.clone());

        let err = CollectionProvisioner
            .ensure(&db, "t", CollectionSize::DEFAULT)
            .await
            .err()
            .unwrap();

        assert_eq!(err, ChannelError::Provisioning(cause));
    }
}
