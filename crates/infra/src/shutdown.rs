use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::storage::{Database, StorageError};
use crate::subscriber::SubscriberHandle;

/// Releases a channel's resources exactly once.
///
/// The first `close` stops the tail (releasing its cursor) and then closes the
/// database handle. Concurrent callers wait for that release to finish and
/// get `Ok(())`; only the caller that performed it sees a release failure.
pub struct ShutdownCoordinator {
    subscriber: Mutex<Option<SubscriberHandle>>,
    database: Arc<dyn Database>,
    released: OnceCell<()>,
}

impl ShutdownCoordinator {
    pub fn new(database: Arc<dyn Database>, subscriber: Option<SubscriberHandle>) -> Self {
        Self {
            subscriber: Mutex::new(subscriber),
            database,
            released: OnceCell::new(),
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.initialized()
    }

    pub async fn close(&self) -> Result<(), ChannelError> {
        let mut outcome = Ok(());
        let slot = &mut outcome;
        self.released
            .get_or_init(|| async move {
                *slot = self.release().await;
            })
            .await;
        outcome
    }

    async fn release(&self) -> Result<(), ChannelError> {
        let mut first_error: Option<StorageError> = None;

        let subscriber = self
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = subscriber {
            if let Err(err) = handle.stop().await {
                warn!(error = %err, "tail did not release cleanly");
                first_error.get_or_insert(err);
            }
        }

        if let Err(err) = self.database.close().await {
            warn!(error = %err, "database handle did not close cleanly");
            first_error.get_or_insert(err);
        }

        debug!(clean = first_error.is_none(), "channel resources released");
        match first_error {
            Some(err) => Err(ChannelError::Shutdown(err)),
            None => Ok(()),
        }
    }
}

impl core::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}
