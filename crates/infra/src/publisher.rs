use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::instrument;

use tailcast_core::{Message, PublishAck};

use crate::storage::{Collection, StorageError};

/// Appends messages to a topic's collection.
///
/// Publishing returns once the append is acknowledged by storage. Delivery to
/// subscribers happens through the shared log and is never confirmed to the
/// publisher.
#[derive(Clone)]
pub struct Publisher {
    collection: Arc<dyn Collection>,
}

impl Publisher {
    pub fn new(collection: Arc<dyn Collection>) -> Self {
        Self { collection }
    }

    pub fn topic(&self) -> &str {
        self.collection.name()
    }

    #[instrument(skip(self, data), fields(topic = %self.collection.name()), err)]
    pub async fn publish(&self, event: &str, data: JsonValue) -> Result<PublishAck, StorageError> {
        let message = Message::new(event, data);
        self.collection.insert(&message).await?;
        Ok(PublishAck::from(&message))
    }
}

impl core::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.collection.name())
            .finish()
    }
}
