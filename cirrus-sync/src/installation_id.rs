//! Installation identifier persistence.

use crate::error::SyncResult;
use crate::storage::KeyValueStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

const INSTALLATION_ID_KEY: &str = "InstallationId";

/// Gets, generates and persists the identifier of this installation.
pub struct InstallationIdController {
    store: Arc<KeyValueStore>,
    cached: Mutex<Option<Uuid>>,
}

impl InstallationIdController {
    pub fn new(store: Arc<KeyValueStore>) -> Self {
        Self {
            store,
            cached: Mutex::new(None),
        }
    }

    /// The installation id, generating and persisting a new one on first use.
    pub async fn get(&self) -> SyncResult<Uuid> {
        let mut cached = self.cached.lock().await;
        if let Some(id) = *cached {
            return Ok(id);
        }

        let stored = self
            .store
            .get(INSTALLATION_ID_KEY)
            .await?
            .and_then(|value| value.as_str().and_then(|s| Uuid::parse_str(s).ok()));
        let id = match stored {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4();
                self.store
                    .set(INSTALLATION_ID_KEY, id.to_string().into())
                    .await?;
                info!(installation_id = %id, "generated installation id");
                id
            }
        };
        *cached = Some(id);
        Ok(id)
    }

    /// Replaces the installation id. `None` removes it; the next
    /// [`get`](Self::get) generates a fresh one.
    pub async fn set(&self, id: Option<Uuid>) -> SyncResult<()> {
        let mut cached = self.cached.lock().await;
        match id {
            Some(id) => {
                self.store
                    .set(INSTALLATION_ID_KEY, id.to_string().into())
                    .await?
            }
            None => self.store.remove(INSTALLATION_ID_KEY).await?,
        }
        *cached = id;
        debug!(installation_id = ?id, "installation id replaced");
        Ok(())
    }

    pub async fn clear(&self) -> SyncResult<()> {
        self.set(None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn controller(storage: Arc<MemoryStorage>) -> InstallationIdController {
        InstallationIdController::new(Arc::new(KeyValueStore::new(storage)))
    }

    #[tokio::test]
    async fn generated_id_is_stable_and_persisted() {
        let storage = Arc::new(MemoryStorage::new());
        let first = controller(storage.clone()).get().await.unwrap();
        let again = controller(storage).get().await.unwrap();
        assert_eq!(first, again);
        assert_eq!(first.get_version_num(), 4);
    }

    #[tokio::test]
    async fn clear_forces_a_new_id() {
        let ids = controller(Arc::new(MemoryStorage::new()));
        let first = ids.get().await.unwrap();
        ids.clear().await.unwrap();
        assert_ne!(ids.get().await.unwrap(), first);
    }

    #[tokio::test]
    async fn set_overrides_stored_id() {
        let ids = controller(Arc::new(MemoryStorage::new()));
        let id = Uuid::new_v4();
        ids.set(Some(id)).await.unwrap();
        assert_eq!(ids.get().await.unwrap(), id);
    }
}
