//! The client context.
//!
//! A [`Client`] owns every collaborator of the sync layer: the subclass
//! registry and decoder, the command runner, the object controller, the
//! persisted singletons and the ordering queues. There is no process-wide
//! default client; pass a `Client` (it is cheap to clone) to whatever needs
//! one.
//!
//! Saves, fetches and deletes of an entity run through the ordering queue of
//! that entity instance, so two saves of one entity never interleave their
//! snapshot and merge steps.

use crate::cloud::CloudController;
use crate::config::ClientConfig;
use crate::current::{
    ConfigController, CurrentEntityController, CurrentUserController, RemoteConfig,
    CURRENT_INSTALLATION_KEY, CURRENT_USER_KEY,
};
use crate::error::{SyncError, SyncResult};
use crate::installation_id::InstallationIdController;
use crate::object_controller::ObjectController;
use crate::queue::{enqueue_for_all, OrderingQueue, QueueRegistry, ResourceKey};
use crate::runner::CommandRunner;
use crate::storage::{KeyValueStore, Storage};
use crate::transport::{HttpTransport, Transport};
use crate::user_controller::UserController;
use cirrus_model::{
    Decoder, Entity, EntitySubclass, Installation, ObjectState, SaveSnapshot, SubclassRegistry,
    User, Value,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct ClientInner {
    config: ClientConfig,
    registry: Arc<SubclassRegistry>,
    decoder: Arc<Decoder>,
    installation_id: Arc<InstallationIdController>,
    runner: Arc<CommandRunner>,
    objects: Arc<ObjectController>,
    users: Arc<UserController>,
    cloud: CloudController,
    queues: QueueRegistry,
    current_user: CurrentUserController,
    current_installation: CurrentEntityController,
    remote_config: ConfigController,
}

/// Entry point for saving, fetching and deleting entities.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Builds a client from its collaborators.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn Storage>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let registry = Arc::new(SubclassRegistry::with_builtins());
        let decoder = Arc::new(Decoder::new(registry.clone()));
        let store = Arc::new(KeyValueStore::new(storage));
        let installation_id = Arc::new(InstallationIdController::new(store.clone()));
        let runner = Arc::new(CommandRunner::new(
            transport,
            config.clone(),
            installation_id.clone(),
        ));
        let objects = Arc::new(ObjectController::new(runner.clone(), decoder.clone())?);
        let users = Arc::new(UserController::new(runner.clone(), decoder.clone()));
        let cloud = CloudController::new(runner.clone(), decoder.clone());
        let queues = QueueRegistry::new();

        let current_user = CurrentUserController::new(
            CurrentEntityController::new(
                CURRENT_USER_KEY,
                User::CLASS_NAME,
                store.clone(),
                decoder.clone(),
                queues.clone(),
            ),
            runner.clone(),
        );
        registry.add_register_hook(User::CLASS_NAME, current_user.entity().memory_clearer());

        let current_installation = CurrentEntityController::new(
            CURRENT_INSTALLATION_KEY,
            Installation::CLASS_NAME,
            store.clone(),
            decoder.clone(),
            queues.clone(),
        );
        let remote_config = ConfigController::new(runner.clone(), store, decoder.clone());

        info!(server_url = %config.server_url, application_id = %config.application_id, "client ready");
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                registry,
                decoder,
                installation_id,
                runner,
                objects,
                users,
                cloud,
                queues,
                current_user,
                current_installation,
                remote_config,
            }),
        })
    }

    /// Builds a client talking HTTP to `config.server_url`.
    pub fn with_http(config: ClientConfig, storage: Arc<dyn Storage>) -> SyncResult<Self> {
        let transport = HttpTransport::new(
            &config.server_url,
            Duration::from_millis(config.timeout_ms),
        )?;
        Self::new(config, Arc::new(transport), storage)
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SubclassRegistry> {
        &self.inner.registry
    }

    #[must_use]
    pub fn decoder(&self) -> &Arc<Decoder> {
        &self.inner.decoder
    }

    #[must_use]
    pub fn runner(&self) -> &Arc<CommandRunner> {
        &self.inner.runner
    }

    #[must_use]
    pub fn objects(&self) -> &Arc<ObjectController> {
        &self.inner.objects
    }

    #[must_use]
    pub fn queues(&self) -> &QueueRegistry {
        &self.inner.queues
    }

    // ── Entities ─────────────────────────────────────────────────

    /// Registers a typed subclass.
    pub fn register_subclass<T: EntitySubclass>(&self) -> SyncResult<()> {
        Ok(self.inner.registry.register::<T>()?)
    }

    /// A new entity of `class_name`, typed when a subclass is registered.
    #[must_use]
    pub fn create(&self, class_name: &str) -> Entity {
        self.inner.registry.instantiate(class_name)
    }

    /// A new instance of the registered subclass `T`.
    pub fn create_typed<T: EntitySubclass>(&self) -> SyncResult<T> {
        Ok(self.inner.registry.create::<T>()?)
    }

    /// A reference to an existing remote object, to be fetched later.
    #[must_use]
    pub fn create_without_data(&self, class_name: &str, object_id: &str) -> Entity {
        self.inner.registry.create_without_data(class_name, object_id)
    }

    fn queue_of(&self, entity: &Entity) -> Arc<OrderingQueue> {
        self.inner
            .queues
            .queue_for(ResourceKey::Entity(entity.instance_id()))
    }

    // ── Save ─────────────────────────────────────────────────────

    /// Saves `entity` and every unsaved or dirty entity it references.
    ///
    /// Referenced entities are saved first, in batches, so that pointers to
    /// them can be encoded. On failure the pending operations of `entity`
    /// are kept for the next save.
    pub async fn save(&self, entity: &Entity, cancel: &CancellationToken) -> SyncResult<()> {
        let session_token = self.session_token(cancel).await?;

        let mut seen = HashSet::from([entity.instance_id()]);
        let mut children = Vec::new();
        for child in entity.children() {
            collect_dirty(&child, &mut seen, &mut children);
        }
        self.save_in_dependency_order(children, session_token.clone(), cancel)
            .await?;

        if !entity.is_self_dirty() {
            debug!(class = %entity.class_name(), "nothing to save");
            return Ok(());
        }
        self.save_one(entity.clone(), session_token, cancel).await?;
        if self.inner.current_user.entity().is_current(entity) {
            self.inner
                .current_user
                .entity()
                .set(entity.clone(), cancel)
                .await?;
        }
        Ok(())
    }

    /// Saves every entity in `entities`, along with the entities they
    /// reference, through the batch endpoint.
    pub async fn save_all(&self, entities: &[Entity], cancel: &CancellationToken) -> SyncResult<()> {
        let session_token = self.session_token(cancel).await?;
        let mut seen = HashSet::new();
        let mut dirty = Vec::new();
        for entity in entities {
            collect_dirty(entity, &mut seen, &mut dirty);
        }
        self.save_in_dependency_order(dirty, session_token, cancel).await
    }

    async fn save_one(
        &self,
        entity: Entity,
        session_token: Option<String>,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let objects = self.inner.objects.clone();
        let task_cancel = cancel.clone();
        self.queue_of(&entity)
            .enqueue(
                move |predecessor| {
                    let snapshot = entity.start_save();
                    async move {
                        if let Err(e) = predecessor.ready().await {
                            entity.handle_failed_save(snapshot.token);
                            return Err(e);
                        }
                        let state = entity.state();
                        if snapshot.operations.is_empty() && state.object_id().is_some() {
                            // An earlier save already created the object.
                            entity.handle_failed_save(snapshot.token);
                            return Ok(());
                        }
                        let result = objects
                            .save(
                                &state,
                                &snapshot.operations,
                                session_token.as_deref(),
                                &task_cancel,
                            )
                            .await;
                        match result {
                            Ok(saved) => {
                                entity.handle_save(snapshot.token, &saved);
                                Ok(())
                            }
                            Err(e) => {
                                debug!(class = %entity.class_name(), "save failed: {e}");
                                entity.handle_failed_save(snapshot.token);
                                Err(e)
                            }
                        }
                    }
                },
                cancel,
            )
            .await
    }

    /// Saves `dirty` in rounds; each round batches the entities whose
    /// references all have object ids.
    async fn save_in_dependency_order(
        &self,
        mut remaining: Vec<Entity>,
        session_token: Option<String>,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        while !remaining.is_empty() {
            let (ready, blocked): (Vec<Entity>, Vec<Entity>) = remaining
                .into_iter()
                .partition(|entity| entity.children().iter().all(|c| c.object_id().is_some()));
            if ready.is_empty() {
                return Err(SyncError::InvalidState(
                    "found a circular dependency while saving".into(),
                ));
            }
            debug!(ready = ready.len(), blocked = blocked.len(), "saving batch round");
            self.batch_save(ready, session_token.clone(), cancel).await?;
            remaining = blocked;
        }
        Ok(())
    }

    async fn batch_save(
        &self,
        entities: Vec<Entity>,
        session_token: Option<String>,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let queues: Vec<Arc<OrderingQueue>> = entities.iter().map(|e| self.queue_of(e)).collect();
        let objects = self.inner.objects.clone();
        let task_cancel = cancel.clone();
        enqueue_for_all(
            &queues,
            move |predecessor| {
                let snapshots: Vec<SaveSnapshot> = entities.iter().map(Entity::start_save).collect();
                async move {
                    if let Err(e) = predecessor.ready().await {
                        for (entity, snapshot) in entities.iter().zip(&snapshots) {
                            entity.handle_failed_save(snapshot.token);
                        }
                        return Err(e);
                    }
                    let items: Vec<(ObjectState, _)> = entities
                        .iter()
                        .zip(&snapshots)
                        .map(|(entity, snapshot)| (entity.state(), snapshot.operations.clone()))
                        .collect();
                    let results = objects
                        .save_all(&items, session_token.as_deref(), &task_cancel)
                        .await;

                    let mut errors = Vec::new();
                    for ((entity, snapshot), result) in entities.iter().zip(&snapshots).zip(results) {
                        match result {
                            Ok(saved) => entity.handle_save(snapshot.token, &saved),
                            Err(e) => {
                                entity.handle_failed_save(snapshot.token);
                                errors.push(e);
                            }
                        }
                    }
                    aggregate(errors)
                }
            },
            cancel,
        )
        .await
    }

    // ── Fetch ────────────────────────────────────────────────────

    /// Fetches the server state of `entity` and merges it in.
    pub async fn fetch(&self, entity: &Entity, cancel: &CancellationToken) -> SyncResult<Entity> {
        if entity.object_id().is_none() {
            return Err(SyncError::InvalidState(format!(
                "{} has no object id; it cannot be fetched",
                entity.class_name()
            )));
        }
        let session_token = self.session_token(cancel).await?;
        let objects = self.inner.objects.clone();
        let task_cancel = cancel.clone();
        let target = entity.clone();
        self.queue_of(entity)
            .enqueue(
                move |predecessor| async move {
                    predecessor.ready().await?;
                    let fetched = objects
                        .fetch(&target.state(), session_token.as_deref(), &task_cancel)
                        .await?;
                    target.handle_fetch_result(&fetched);
                    Ok(target)
                },
                cancel,
            )
            .await
    }

    /// Fetches `entity` unless its data is already available.
    pub async fn fetch_if_needed(
        &self,
        entity: &Entity,
        cancel: &CancellationToken,
    ) -> SyncResult<Entity> {
        if entity.is_data_available() {
            return Ok(entity.clone());
        }
        self.fetch(entity, cancel).await
    }

    // ── Delete ───────────────────────────────────────────────────

    /// Deletes `entity` on the server. An entity that was never saved is left alone.
    pub async fn delete(&self, entity: &Entity, cancel: &CancellationToken) -> SyncResult<()> {
        if entity.object_id().is_none() {
            debug!(class = %entity.class_name(), "nothing to delete");
            return Ok(());
        }
        let session_token = self.session_token(cancel).await?;
        let objects = self.inner.objects.clone();
        let task_cancel = cancel.clone();
        let target = entity.clone();
        self.queue_of(entity)
            .enqueue(
                move |predecessor| async move {
                    predecessor.ready().await?;
                    objects
                        .delete(&target.state(), session_token.as_deref(), &task_cancel)
                        .await
                },
                cancel,
            )
            .await
    }

    /// Deletes every saved entity in `entities` through the batch endpoint.
    pub async fn delete_all(
        &self,
        entities: &[Entity],
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let mut seen = HashSet::new();
        let targets: Vec<Entity> = entities
            .iter()
            .filter(|e| e.object_id().is_some() && seen.insert(e.instance_id()))
            .cloned()
            .collect();
        if targets.is_empty() {
            return Ok(());
        }
        let session_token = self.session_token(cancel).await?;
        let queues: Vec<Arc<OrderingQueue>> = targets.iter().map(|e| self.queue_of(e)).collect();
        let objects = self.inner.objects.clone();
        let task_cancel = cancel.clone();
        enqueue_for_all(
            &queues,
            move |predecessor| async move {
                predecessor.ready().await?;
                let states: Vec<ObjectState> = targets.iter().map(Entity::state).collect();
                let results = objects
                    .delete_all(&states, session_token.as_deref(), &task_cancel)
                    .await;
                aggregate(results.into_iter().filter_map(Result::err).collect())
            },
            cancel,
        )
        .await
    }

    // ── Singletons ───────────────────────────────────────────────

    /// The logged-in user, if any.
    pub async fn current_user(&self, cancel: &CancellationToken) -> SyncResult<Option<User>> {
        Ok(self
            .inner
            .current_user
            .entity()
            .get(cancel)
            .await?
            .and_then(|entity| entity.downcast::<User>()))
    }

    /// Makes `user` the logged-in user and persists it.
    pub async fn set_current_user(&self, user: &User, cancel: &CancellationToken) -> SyncResult<()> {
        self.inner
            .current_user
            .entity()
            .set(user.entity().clone(), cancel)
            .await
    }

    /// Session token of the logged-in user.
    pub async fn session_token(&self, cancel: &CancellationToken) -> SyncResult<Option<String>> {
        self.inner.current_user.current_session_token(cancel).await
    }

    /// Logs the current user out, revoking a revocable session on the server.
    pub async fn log_out(&self, cancel: &CancellationToken) -> SyncResult<()> {
        self.inner.current_user.log_out(cancel).await
    }

    // ── Users ────────────────────────────────────────────────────

    /// Creates `user` on the server and makes it the current user.
    ///
    /// The user needs a username and a password and must not have been
    /// saved before. The password is not kept in the confirmed state.
    pub async fn sign_up(&self, user: &User, cancel: &CancellationToken) -> SyncResult<()> {
        if user.username().is_none_or(|name| name.is_empty()) {
            return Err(SyncError::InvalidState(
                "cannot sign up a user with an empty name".into(),
            ));
        }
        if user.get_str("password").is_none_or(|password| password.is_empty()) {
            return Err(SyncError::InvalidState(
                "cannot sign up a user with an empty password".into(),
            ));
        }
        if user.object_id().is_some() {
            return Err(SyncError::InvalidState(
                "cannot sign up a user that already exists".into(),
            ));
        }

        let session_token = self.session_token(cancel).await?;
        let mut seen = HashSet::from([user.instance_id()]);
        let mut children = Vec::new();
        for child in user.children() {
            collect_dirty(&child, &mut seen, &mut children);
        }
        self.save_in_dependency_order(children, session_token, cancel)
            .await?;

        let entity = user.entity().clone();
        let users = self.inner.users.clone();
        let task_cancel = cancel.clone();
        self.queue_of(&entity)
            .enqueue(
                move |predecessor| {
                    let snapshot = entity.start_save();
                    async move {
                        if let Err(e) = predecessor.ready().await {
                            entity.handle_failed_save(snapshot.token);
                            return Err(e);
                        }
                        match users.sign_up(&snapshot.operations, &task_cancel).await {
                            Ok(state) => {
                                entity.handle_save(snapshot.token, &state);
                                entity.forget_server_value("password");
                                Ok(())
                            }
                            Err(e) => {
                                entity.handle_failed_save(snapshot.token);
                                Err(e)
                            }
                        }
                    }
                },
                cancel,
            )
            .await?;

        info!(username = ?user.username(), "signed up");
        self.set_current_user(user, cancel).await
    }

    /// Logs in with a username and password and makes the returned user current.
    pub async fn log_in(
        &self,
        username: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<User> {
        let state = self.inner.users.log_in(username, password, cancel).await?;
        self.adopt_user(state, cancel).await
    }

    /// Makes the owner of `session_token` the current user.
    pub async fn become_user(
        &self,
        session_token: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<User> {
        let state = self.inner.users.get_user(session_token, cancel).await?;
        self.adopt_user(state, cancel).await
    }

    async fn adopt_user(&self, state: ObjectState, cancel: &CancellationToken) -> SyncResult<User> {
        let user = self
            .inner
            .registry
            .from_state(state)
            .downcast::<User>()
            .ok_or_else(|| SyncError::InvalidState("server returned a non-user object".into()))?;
        self.set_current_user(&user, cancel).await?;
        info!(object_id = ?user.object_id(), "user is now current");
        Ok(user)
    }

    /// Asks the server to send a password reset mail to `email`.
    pub async fn request_password_reset(
        &self,
        email: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        self.inner.users.request_password_reset(email, cancel).await
    }

    // ── Functions ────────────────────────────────────────────────

    /// Calls the server function `name` as the current user.
    pub async fn call_function(
        &self,
        name: &str,
        params: &BTreeMap<String, Value>,
        cancel: &CancellationToken,
    ) -> SyncResult<Option<Value>> {
        let session_token = self.session_token(cancel).await?;
        self.inner
            .cloud
            .call_function(name, params, session_token.as_deref(), cancel)
            .await
    }

    // ── Installation / config ────────────────────────────────────

    /// The installation of this device, created on first use.
    ///
    /// Its `installationId` attribute always matches [`installation_id`](Self::installation_id).
    pub async fn current_installation(&self, cancel: &CancellationToken) -> SyncResult<Installation> {
        let controller = &self.inner.current_installation;
        let id = self.inner.installation_id.get().await?.to_string();
        let stored = controller
            .get(cancel)
            .await?
            .and_then(|entity| entity.downcast::<Installation>());
        let installation = match stored {
            Some(installation) => installation,
            None => {
                let installation: Installation = self.create_typed()?;
                controller.set(installation.entity().clone(), cancel).await?;
                info!(installation_id = %id, "created current installation");
                installation
            }
        };
        if installation.installation_id().as_deref() != Some(id.as_str()) {
            installation.set_installation_id(&id)?;
        }
        Ok(installation)
    }

    /// The identifier sent as `X-Parse-Installation-Id`.
    pub async fn installation_id(&self) -> SyncResult<Uuid> {
        self.inner.installation_id.get().await
    }

    /// Fetches the remote configuration and makes it current.
    pub async fn fetch_config(&self, cancel: &CancellationToken) -> SyncResult<RemoteConfig> {
        let session_token = self.session_token(cancel).await?;
        self.inner
            .remote_config
            .fetch(session_token.as_deref(), cancel)
            .await
    }

    /// The last fetched remote configuration.
    pub async fn current_config(&self) -> SyncResult<RemoteConfig> {
        self.inner.remote_config.current().await
    }
}

/// Collects `entity` and everything reachable from it that needs saving,
/// referenced entities before the entities referencing them.
fn collect_dirty(entity: &Entity, seen: &mut HashSet<Uuid>, out: &mut Vec<Entity>) {
    if !seen.insert(entity.instance_id()) {
        return;
    }
    for child in entity.children() {
        collect_dirty(&child, seen, out);
    }
    if entity.is_self_dirty() {
        out.push(entity.clone());
    }
}

fn aggregate(errors: Vec<SyncError>) -> SyncResult<()> {
    if errors.is_empty() {
        return Ok(());
    }
    if errors.iter().all(SyncError::is_cancelled) {
        return Err(SyncError::Cancelled);
    }
    warn!(failed = errors.len(), "multi-entity operation failed");
    Err(SyncError::Aggregate(errors))
}
