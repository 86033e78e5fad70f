//! Persisted singletons: the current user, the current installation and the
//! current remote configuration.
//!
//! Each singleton is cached in memory and persisted through the shared
//! [`KeyValueStore`]. Reads and writes of one singleton are serialized
//! through the ordering queue registered under its storage key.

use crate::command::{Command, Method};
use crate::error::SyncResult;
use crate::queue::{QueueRegistry, ResourceKey};
use crate::runner::CommandRunner;
use crate::storage::KeyValueStore;
use cirrus_model::codec::encode_map;
use cirrus_model::coder::{decode_state, encode_state};
use cirrus_model::{Decoder, Entity, Value};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const CURRENT_USER_KEY: &str = "CurrentUser";
pub const CURRENT_INSTALLATION_KEY: &str = "CurrentInstallation";
pub const CURRENT_CONFIG_KEY: &str = "CurrentConfig";

type Cached<T> = Arc<Mutex<Option<T>>>;

fn lock<T>(cached: &Cached<T>) -> MutexGuard<'_, Option<T>> {
    cached.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One persisted entity singleton.
#[derive(Clone)]
pub struct CurrentEntityController {
    storage_key: &'static str,
    class_name: String,
    store: Arc<KeyValueStore>,
    decoder: Arc<Decoder>,
    queues: QueueRegistry,
    cached: Cached<Entity>,
}

impl CurrentEntityController {
    pub fn new(
        storage_key: &'static str,
        class_name: impl Into<String>,
        store: Arc<KeyValueStore>,
        decoder: Arc<Decoder>,
        queues: QueueRegistry,
    ) -> Self {
        Self {
            storage_key,
            class_name: class_name.into(),
            store,
            decoder,
            queues,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    fn resource(&self) -> ResourceKey {
        ResourceKey::singleton(self.storage_key)
    }

    /// The current entity, loaded from storage on first use.
    pub async fn get(&self, cancel: &CancellationToken) -> SyncResult<Option<Entity>> {
        let this = self.clone();
        self.queues
            .queue_for(self.resource())
            .enqueue(
                move |predecessor| async move {
                    predecessor.ready().await?;
                    let cached = lock(&this.cached).clone();
                    if cached.is_some() {
                        return Ok(cached);
                    }
                    let Some(stored) = this.store.get(this.storage_key).await? else {
                        return Ok(None);
                    };
                    let JsonValue::Object(map) = stored else {
                        warn!(key = this.storage_key, "ignoring malformed stored entity");
                        return Ok(None);
                    };
                    let state = decode_state(&map, &this.class_name, &this.decoder)?;
                    let entity = this.decoder.registry().from_state(state);
                    debug!(key = this.storage_key, object_id = ?entity.object_id(), "loaded current entity");
                    *lock(&this.cached) = Some(entity.clone());
                    Ok(Some(entity))
                },
                cancel,
            )
            .await
    }

    /// Makes `entity` current and persists its confirmed state.
    pub async fn set(&self, entity: Entity, cancel: &CancellationToken) -> SyncResult<()> {
        let this = self.clone();
        self.queues
            .queue_for(self.resource())
            .enqueue(
                move |predecessor| async move {
                    predecessor.ready().await?;
                    let encoded = encode_state(&entity.state())?;
                    this.store
                        .set(this.storage_key, JsonValue::Object(encoded))
                        .await?;
                    info!(key = this.storage_key, object_id = ?entity.object_id(), "current entity set");
                    *lock(&this.cached) = Some(entity);
                    Ok(())
                },
                cancel,
            )
            .await
    }

    /// Whether a current entity is cached or stored.
    pub async fn exists(&self, cancel: &CancellationToken) -> SyncResult<bool> {
        let this = self.clone();
        self.queues
            .queue_for(self.resource())
            .enqueue(
                move |predecessor| async move {
                    predecessor.ready().await?;
                    if lock(&this.cached).is_some() {
                        return Ok(true);
                    }
                    this.store.contains_key(this.storage_key).await
                },
                cancel,
            )
            .await
    }

    /// Whether `entity` is the cached current entity.
    #[must_use]
    pub fn is_current(&self, entity: &Entity) -> bool {
        lock(&self.cached)
            .as_ref()
            .is_some_and(|current| current.ptr_eq(entity))
    }

    /// Drops the cached entity; the next [`get`](Self::get) reloads it.
    pub fn clear_from_memory(&self) {
        *lock(&self.cached) = None;
    }

    /// A callback that drops the cached entity without keeping the controller alive.
    pub(crate) fn memory_clearer(&self) -> impl Fn() + Send + Sync + 'static + use<> {
        let cached = Arc::downgrade(&self.cached);
        move || {
            if let Some(cached) = cached.upgrade() {
                *lock(&cached) = None;
            }
        }
    }

    /// Drops the cached entity and removes the stored one.
    pub async fn clear_from_disk(&self, cancel: &CancellationToken) -> SyncResult<()> {
        let this = self.clone();
        self.queues
            .queue_for(self.resource())
            .enqueue(
                move |predecessor| async move {
                    predecessor.ready().await?;
                    *lock(&this.cached) = None;
                    this.store.remove(this.storage_key).await?;
                    debug!(key = this.storage_key, "current entity cleared");
                    Ok(())
                },
                cancel,
            )
            .await
    }
}

/// The current user singleton.
#[derive(Clone)]
pub struct CurrentUserController {
    current: CurrentEntityController,
    runner: Arc<CommandRunner>,
}

impl CurrentUserController {
    pub fn new(current: CurrentEntityController, runner: Arc<CommandRunner>) -> Self {
        Self { current, runner }
    }

    /// The underlying singleton controller.
    #[must_use]
    pub fn entity(&self) -> &CurrentEntityController {
        &self.current
    }

    /// Session token of the current user, if one is logged in.
    pub async fn current_session_token(
        &self,
        cancel: &CancellationToken,
    ) -> SyncResult<Option<String>> {
        Ok(self
            .current
            .get(cancel)
            .await?
            .and_then(|user| user.session_token()))
    }

    /// Logs the current user out.
    ///
    /// A revocable session (`r:` token) is revoked on the server first; a
    /// failed revocation is logged and does not keep the user logged in.
    pub async fn log_out(&self, cancel: &CancellationToken) -> SyncResult<()> {
        let token = self.current_session_token(cancel).await?;
        if let Some(token) = token.filter(|t| t.starts_with("r:")) {
            let command = Command::new(Method::Post, "logout").with_session_token(Some(token));
            if let Err(e) = self.runner.run_command(command, cancel).await {
                if e.is_cancelled() {
                    return Err(e);
                }
                warn!("failed to revoke session: {e}");
            }
        }
        self.current.clear_from_disk(cancel).await?;
        info!("logged out");
        Ok(())
    }
}

/// Parameters of the remote configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteConfig {
    params: BTreeMap<String, Value>,
}

impl RemoteConfig {
    #[must_use]
    pub fn new(params: BTreeMap<String, Value>) -> Self {
        Self { params }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }
}

/// Fetches and caches the remote configuration.
pub struct ConfigController {
    runner: Arc<CommandRunner>,
    store: Arc<KeyValueStore>,
    decoder: Arc<Decoder>,
    cached: Cached<RemoteConfig>,
}

impl ConfigController {
    pub fn new(runner: Arc<CommandRunner>, store: Arc<KeyValueStore>, decoder: Arc<Decoder>) -> Self {
        Self {
            runner,
            store,
            decoder,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    fn decode(&self, json: Option<&JsonValue>) -> SyncResult<RemoteConfig> {
        match json {
            Some(JsonValue::Object(params)) => Ok(RemoteConfig::new(self.decoder.decode_map(params)?)),
            _ => Ok(RemoteConfig::default()),
        }
    }

    /// Fetches the configuration and makes it current.
    pub async fn fetch(
        &self,
        session_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> SyncResult<RemoteConfig> {
        let command = Command::new(Method::Get, "config")
            .with_session_token(session_token.map(str::to_string));
        let response = self.runner.run_command(command, cancel).await?;
        let config = self.decode(response.body.get("params"))?;

        let mut stored = serde_json::Map::new();
        stored.insert("params".into(), JsonValue::Object(encode_map(config.params())?));
        self.store
            .set(CURRENT_CONFIG_KEY, JsonValue::Object(stored))
            .await?;
        *lock(&self.cached) = Some(config.clone());
        debug!(params = config.params().len(), "config fetched");
        Ok(config)
    }

    /// The last fetched configuration, or an empty one.
    pub async fn current(&self) -> SyncResult<RemoteConfig> {
        let cached = lock(&self.cached).clone();
        if let Some(config) = cached {
            return Ok(config);
        }
        let config = match self.store.get(CURRENT_CONFIG_KEY).await? {
            Some(stored) => self.decode(stored.get("params"))?,
            None => RemoteConfig::default(),
        };
        *lock(&self.cached) = Some(config.clone());
        Ok(config)
    }

    pub fn clear_from_memory(&self) {
        *lock(&self.cached) = None;
    }
}
